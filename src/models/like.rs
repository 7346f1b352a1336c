use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeSummary {
    pub your_likes: i64,
    pub likes: i64,
    pub dislikes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    #[serde(alias = "rootid")]
    pub root_id: i64,
    pub direction: i64,
}
