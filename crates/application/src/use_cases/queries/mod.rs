mod search_log;

pub use search_log::SearchQueryLogUseCase;
