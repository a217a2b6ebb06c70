//! Model output recovery: JSON extraction plus alias-table normalization.

pub mod aliases;
pub mod processor;

pub use aliases::FieldAlias;
pub use processor::{
    clean_json_string, extract_list, normalize_keys, parse_json_object, parse_tags,
    strip_control_chars,
    ResponseProcessor,
};
