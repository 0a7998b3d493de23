/// Loads the SQL file at `$file` substituting every `{0}` with the table prefix.
#[macro_export]
#[doc(hidden)]
macro_rules! statement {
    ($file:expr, $prefix:expr $(,)?) => {{
        format!(include_str!($file), $prefix)
    }};
}

pub mod event;
pub mod migrations;
pub mod statements;
