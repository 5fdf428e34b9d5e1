pub mod detail;
pub mod error;
pub mod listing;
pub mod models;
pub mod schema;
pub mod state;
pub mod test_utils;
pub mod utils;

pub use detail::{DetailView, EditForm, Editable, TabSpec};
pub use error::ApiError;
pub use listing::{ListParams, ListResponse, Listable, SortDirection, SortSpec, SortState};
pub use state::AppState;
pub use utils::{create_conn, document_number, non_blank, run_blocking, slugify, DbPool};
