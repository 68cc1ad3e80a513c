use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use tally_protocol::{error_codes, Response};

use crate::error::SessionError;
use crate::router::ServiceHandler;
use crate::session::SessionManager;
use crate::storage::{SessionTrigger, Store};

#[derive(Debug, Deserialize)]
struct SessionStartParams {
    #[serde(default)]
    trigger: Option<SessionTrigger>,
    #[serde(default)]
    account_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SessionIdParams {
    session_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct SessionListParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

/// Session orchestration RPC surface (`session.*`).
pub struct SessionService {
    manager: SessionManager,
    store: Arc<dyn Store>,
}

impl SessionService {
    pub fn new(manager: SessionManager, store: Arc<dyn Store>) -> Self {
        Self { manager, store }
    }

    fn start(&mut self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: SessionStartParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => SessionStartParams {
                trigger: None,
                account_ids: None,
            },
        };

        let trigger = params.trigger.unwrap_or(SessionTrigger::Manual);
        match self.manager.start_session(trigger, params.account_ids) {
            Ok(session) => Response::success(req_id, json!({ "session": session })),
            Err(SessionError::AlreadyRunning) => Response::error(
                req_id,
                error_codes::SESSION_ALREADY_RUNNING,
                "a session is already running",
            ),
            Err(SessionError::NotFound(id)) => Response::error(
                req_id,
                error_codes::SESSION_NOT_FOUND,
                format!("unknown account: {id}"),
            ),
            Err(SessionError::Storage(e)) => {
                Response::error(req_id, error_codes::INTERNAL_ERROR, e)
            }
        }
    }

    fn cancel(&mut self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: SessionIdParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => return Response::error(req_id, error_codes::INVALID_PARAMS, "missing params"),
        };

        if self.manager.cancel_session(&params.session_id) {
            Response::success(req_id, json!({ "cancelled": true }))
        } else {
            Response::error(
                req_id,
                error_codes::SESSION_NOT_FOUND,
                format!("no active session: {}", params.session_id),
            )
        }
    }

    fn list(&mut self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: SessionListParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => SessionListParams::default(),
        };

        let limit = clamp_limit(params.limit, 50, 500);
        let past = match self
            .store
            .list_finished_sessions(limit, params.offset.unwrap_or(0))
        {
            Ok(sessions) => sessions,
            Err(e) => return Response::error(req_id, error_codes::INTERNAL_ERROR, e),
        };
        Response::success(
            req_id,
            json!({ "active": self.manager.list_active_sessions(), "past": past }),
        )
    }

    fn get(&mut self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: SessionIdParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => return Response::error(req_id, error_codes::INVALID_PARAMS, "missing params"),
        };

        match self.store.get_session(&params.session_id) {
            Ok(Some(session)) => Response::success(req_id, json!({ "session": session })),
            Ok(None) => Response::error(
                req_id,
                error_codes::SESSION_NOT_FOUND,
                format!("unknown session: {}", params.session_id),
            ),
            Err(e) => Response::error(req_id, error_codes::INTERNAL_ERROR, e),
        }
    }

    fn logs(&mut self, req_id: uuid::Uuid, params: Option<Value>) -> Response {
        let params: SessionIdParams = match params {
            Some(v) => match serde_json::from_value(v) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        req_id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid params: {e}"),
                    );
                }
            },
            None => return Response::error(req_id, error_codes::INVALID_PARAMS, "missing params"),
        };

        match self.store.get_session(&params.session_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Response::error(
                    req_id,
                    error_codes::SESSION_NOT_FOUND,
                    format!("unknown session: {}", params.session_id),
                );
            }
            Err(e) => return Response::error(req_id, error_codes::INTERNAL_ERROR, e),
        }

        match self.store.list_fetch_logs(&params.session_id) {
            Ok(logs) => Response::success(req_id, json!({ "logs": logs })),
            Err(e) => Response::error(req_id, error_codes::INTERNAL_ERROR, e),
        }
    }
}

impl ServiceHandler for SessionService {
    fn namespace(&self) -> &str {
        "session"
    }

    fn handle_request(
        &mut self,
        id: uuid::Uuid,
        method: &str,
        params: Option<Value>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + '_>> {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "session.start" => self.start(id, params),
                "session.cancel" => self.cancel(id, params),
                "session.list" => self.list(id, params),
                "session.get" => self.get(id, params),
                "session.logs" => self.logs(id, params),
                _ => Response::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method: {method}"),
                ),
            }
        })
    }
}

/// Account registry RPC surface (`account.*`).
pub struct AccountService {
    store: Arc<dyn Store>,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn list(&mut self, req_id: uuid::Uuid) -> Response {
        match self.store.list_accounts() {
            Ok(accounts) => Response::success(req_id, json!({ "accounts": accounts })),
            Err(e) => Response::error(req_id, error_codes::INTERNAL_ERROR, e),
        }
    }
}

impl ServiceHandler for AccountService {
    fn namespace(&self) -> &str {
        "account"
    }

    fn handle_request(
        &mut self,
        id: uuid::Uuid,
        method: &str,
        _params: Option<Value>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Response> + Send + '_>> {
        let method = method.to_string();
        Box::pin(async move {
            match method.as_str() {
                "account.list" => self.list(id),
                _ => Response::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("unknown method: {method}"),
                ),
            }
        })
    }
}

fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}
