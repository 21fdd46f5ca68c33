pub mod errors;
pub mod models;
pub mod pipeline;
pub mod text;

pub use errors::AnkimineError;
pub use models::{ Book, BookState, Card, Chapter, ChapterState, Density, Stage };
pub use pipeline::ChapterPipeline;
