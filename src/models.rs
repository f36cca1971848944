mod model_info;
mod page_excerpt;
mod search_result;

pub use model_info::ModelInfo;
pub use page_excerpt::{Context, PageExcerpt};
pub use search_result::SearchResult;
