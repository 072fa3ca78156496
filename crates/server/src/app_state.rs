use app_api::App;
use tokio::sync::Mutex;

use crate::config::Settings;

pub struct AppState {
    pub(crate) app: Mutex<App>,
    pub(crate) client_script_url: String,
    pub(crate) max_body_bytes: usize,
}

impl AppState {
    pub fn new(app: App, settings: &Settings) -> Self {
        Self {
            app: Mutex::new(app),
            client_script_url: settings.client_script_url.clone(),
            max_body_bytes: settings.max_body_bytes,
        }
    }
}
