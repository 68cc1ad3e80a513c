use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use tally_protocol::Response;

/// One RPC service, owning every method under its namespace prefix
/// (the segment before the first `.` in the method name).
pub trait ServiceHandler: Send {
    fn namespace(&self) -> &str;

    fn handle_request(
        &mut self,
        id: uuid::Uuid,
        method: &str,
        params: Option<Value>,
    ) -> Pin<Box<dyn Future<Output = Response> + Send + '_>>;
}
