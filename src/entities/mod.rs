pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod customer;
pub mod customer_address;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_variant;
pub mod return_item;
pub mod return_request;
pub mod wallet;
pub mod wallet_transaction;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use customer::Entity as Customer;
pub use customer_address::Entity as CustomerAddress;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use product_variant::Entity as ProductVariant;
pub use return_item::Entity as ReturnItem;
pub use return_request::Entity as ReturnRequest;
pub use wallet::Entity as Wallet;
pub use wallet_transaction::Entity as WalletTransaction;
