pub mod files;
pub mod logs;

pub async fn health() -> &'static str {
    "OK"
}
