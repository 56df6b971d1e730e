#![forbid(unsafe_code)]

/// `embed_migrations!` is not rerun when only migration files change, so
/// the crate is rebuilt whenever the migration directory does.
fn main() {
    println!("cargo:rerun-if-changed=./migrations");
}
