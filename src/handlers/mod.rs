pub mod admin;
pub mod auth;
pub mod carts;
pub mod common;
pub mod orders;
pub mod payments;
pub mod products;
pub mod shipping;
pub mod webhooks;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        carts::CartService,
        catalog::ProductService,
        orders::OrderService,
        payments::{PaymentGateway, PaymentService},
        shipping::ShippingService,
    },
};

pub use crate::AppState;

/// Business-logic container handed to every handler through [`AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<ProductService>,
    pub carts: Arc<CartService>,
    pub shipping: Arc<ShippingService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    /// Wires the service graph. Orders sit on top of catalog, cart and
    /// shipping; payments sit on top of orders. A missing gateway leaves the
    /// payment endpoints answering 400 instead of disabling the router.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        redis_client: Arc<redis::Client>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let products = Arc::new(ProductService::new(db_pool.clone(), config.clone()));
        let carts = Arc::new(CartService::new(db_pool.clone()));
        let shipping = Arc::new(ShippingService::new(db_pool.clone()));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            config.clone(),
            event_sender,
            products.clone(),
            carts.clone(),
            shipping.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db_pool,
            config,
            redis_client,
            gateway,
            orders.clone(),
        ));

        Self {
            products,
            carts,
            shipping,
            orders,
            payments,
        }
    }
}
