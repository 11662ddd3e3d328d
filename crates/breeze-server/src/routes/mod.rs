// Export route modules
pub mod messages;
pub mod session;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(messages::routes(state.clone()))
        .merge(session::routes(state))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::state::AppState;
    use axum::response::Response;
    use breeze::agent::{Agent, RunConfig};
    use breeze::chat::ChatApp;
    use breeze::providers::mock::MockProvider;
    use breeze::tools::weather::GetWeather;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    pub fn app_state(provider: MockProvider) -> AppState {
        let agent = Agent::new("Agent", "You are a helpful agent.")
            .with_tool(GetWeather)
            .unwrap();
        AppState::new(ChatApp::new(agent, RunConfig::new(Arc::new(provider))))
    }

    pub async fn read_body(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
