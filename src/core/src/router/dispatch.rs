use serde_json::Value;

use tally_protocol::{error_codes, Response};

use super::handler::ServiceHandler;

/// Routes requests to registered services by namespace prefix.
#[derive(Default)]
pub struct MessageRouter {
    services: Vec<Box<dyn ServiceHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Box<dyn ServiceHandler>) {
        self.services.push(service);
    }

    pub async fn route_request(
        &mut self,
        id: uuid::Uuid,
        method: &str,
        params: Option<Value>,
    ) -> Response {
        let namespace = method.split('.').next().unwrap_or("");
        match self
            .services
            .iter_mut()
            .find(|s| s.namespace() == namespace)
        {
            Some(service) => service.handle_request(id, method, params).await,
            None => Response::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown method: {method}"),
            ),
        }
    }
}
