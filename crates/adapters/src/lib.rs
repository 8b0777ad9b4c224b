mod base_url;
mod error;
mod image;
mod llm;
mod search;

pub use base_url::{check_base_url, resolve_base_url};
pub use error::AdapterError;
pub use image::{
    create_image_chain, GeminiImageAdapter, HuggingFaceInference, SD15_MODEL, SDXL_MODEL,
    TINY_SD_MODEL,
};
pub use llm::{create_llm_adapter, GEMINI_BASE_URL};
pub use search::LexicaSearch;
