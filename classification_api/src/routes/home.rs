use crate::server::SharedState;
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct AppInfo {
    app_name: String,
    version: String,
    status: String,
}

pub async fn home(State(state): State<SharedState>) -> Json<AppInfo> {
    Json(AppInfo {
        app_name: state.application.name.clone(),
        version: state.application.version.clone(),
        status: "up & running".into(),
    })
}
