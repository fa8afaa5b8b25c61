//! Tools served by the daemon.

mod catalog;

pub use catalog::{
    BuiltinToolCatalog, analyze_definition, chat_definition, echo_definition,
    thinkdeep_definition,
};
