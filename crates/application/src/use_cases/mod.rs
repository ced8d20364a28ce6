pub mod queries;

pub use queries::SearchQueryLogUseCase;
