// Upstream client, story cache, aggregator and HTTP routes, shared by the
// server binary, the fetch_stories one-shot tool and the integration tests

pub mod aggregator;
pub mod cache;
pub mod server;
pub mod upstream;
