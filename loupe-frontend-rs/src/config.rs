//! Backend endpoint configuration.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct BackendConfig {
    pub base_url: String,
    pub project_key: String,
}

pub fn backend_config() -> BackendConfig {
    let base_url = if cfg!(feature = "local-backend") {
        "http://localhost:8090/v1"
    } else {
        "https://cloud.loupe.pictures/v1"
    };
    BackendConfig {
        base_url: base_url.to_string(),
        project_key: "loupe-web".to_string(),
    }
}
