mod client;
mod coordinator;

pub use client::*;
pub use coordinator::*;

#[cfg(test)]
pub(crate) use coordinator::tests::CountingFetcher;
