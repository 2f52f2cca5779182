use std::path::{Path, PathBuf};

use ralphex_core::events::EventBus;
use ralphex_core::plan::{self, Plan};

use crate::request::HttpRequest;
use crate::response::{error_response, html_response, json_response, HttpResponse};

const INDEX_HTML: &str = include_str!("static/index.html");

/// Shared state for request handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    /// Plan file backing `/api/plan`; absent in watch-only mode.
    pub plan_path: Option<PathBuf>,
    /// Event source backing `/api/events`.
    pub bus: EventBus,
}

impl Default for ApiState {
    fn default() -> Self {
        Self {
            plan_path: None,
            bus: EventBus::new(),
        }
    }
}

pub fn handle_index(_request: &HttpRequest, _state: &ApiState) -> HttpResponse {
    html_response(INDEX_HTML)
}

pub fn handle_plan(_request: &HttpRequest, state: &ApiState) -> HttpResponse {
    let Some(path) = &state.plan_path else {
        return error_response(404, "no plan configured");
    };
    match load_plan_with_fallback(path) {
        Ok(plan) => json_response(200, &plan),
        Err(err) => error_response(404, &format!("load plan: {err}")),
    }
}

/// Load a plan from disk, falling back to the `completed/` sibling when the
/// original path is gone. No caching: every call reads from disk so mid-run
/// edits and the end-of-run archive move are always visible.
pub fn load_plan_with_fallback(path: &Path) -> std::io::Result<Plan> {
    match plan::parse_plan_file(path) {
        Ok(plan) => Ok(plan),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let completed = path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("completed")
                .join(path.file_name().unwrap_or_default());
            plan::parse_plan_file(completed)
        }
        Err(err) => Err(err),
    }
}
