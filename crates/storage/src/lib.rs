pub mod db;
pub mod import;
pub mod split;

pub use db::{
    apply_enrichment, complete_sequence, create_db, delete_link, delete_transaction,
    fetch_all_transactions, get_children, get_transaction, insert_child, insert_imported,
    insert_link, set_classification, set_split_flags, set_status, DbPool,
};
pub use import::import_batch;
pub use split::{commit_split, SplitCommit};
