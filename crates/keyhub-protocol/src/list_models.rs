use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(rename = "object")]
    pub object: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

impl ModelListResponse {
    pub fn new(models: Vec<String>) -> Self {
        Self {
            object: "list".to_string(),
            data: models
                .into_iter()
                .map(|id| ModelInfo {
                    id,
                    object: "model".to_string(),
                    owned_by: None,
                })
                .collect(),
        }
    }
}
