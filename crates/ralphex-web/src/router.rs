use crate::handler::ApiState;
use crate::request::{HttpMethod, HttpRequest};
use crate::response::HttpResponse;

pub type HandlerFn = fn(&HttpRequest, &ApiState) -> HttpResponse;

#[derive(Debug, Clone)]
struct Route {
    method: HttpMethod,
    path: String,
    handler: HandlerFn,
}

/// Exact-path router for the dashboard's small fixed surface.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, method: HttpMethod, path: &str, handler: HandlerFn) {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            handler,
        });
    }

    pub fn match_route(&self, method: HttpMethod, path: &str) -> Option<HandlerFn> {
        self.routes
            .iter()
            .find(|route| route.method == method && route.path == path)
            .map(|route| route.handler)
    }
}
