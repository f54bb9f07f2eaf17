use serde::Deserialize;
use std::collections::HashMap;

/// One entry of the remote photo listing. The listing carries more fields
/// (dimensions, format, post URL) but only the id and the author are shown.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageItem {
    pub id: i64,
    pub author: String,
}

/// Item id to its comments, in submission order. An absent key means the
/// item has no comments yet; readers must treat both the same.
pub type CommentsForItem = HashMap<i64, Vec<String>>;
