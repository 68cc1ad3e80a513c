mod dispatch;
mod handler;
mod subscriptions;

pub use dispatch::MessageRouter;
pub use handler::ServiceHandler;
pub use subscriptions::SubscriptionManager;
