pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_event;
pub mod product;
pub mod shipping_option;
pub mod user;
