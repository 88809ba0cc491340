//! Shipped crawlers. Each module exposes its `NAME`, the crawler type, and pure
//! parse functions that the crawler applies to fetched payloads.

pub mod dice;
pub mod donyc;
pub mod edmtrain;
pub mod eventbrite;
pub mod nyc_parks;
pub mod resident_advisor;
pub mod the_skint;
pub mod ticketmaster;

#[cfg(test)]
pub(crate) fn fixture(source: &str, file: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source)
        .join(file);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}
