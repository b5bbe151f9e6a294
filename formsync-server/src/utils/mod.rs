//! Utility modules for formsync-server

pub mod db_retry;
