//! Dataflow builders for tests

use dataflow_rs::{Dataflow, InlineExecutor, ThreadPool};
use std::sync::Arc;

/// A root dataflow whose nodes run on the posting thread
pub fn inline_dataflow() -> Dataflow {
    Dataflow::builder()
        .name("inline-test")
        .executor(Arc::new(InlineExecutor))
        .build()
}

/// A root dataflow on a private pool of `threads` workers
pub fn pooled_dataflow(threads: usize) -> Dataflow {
    let pool = ThreadPool::with_prefix(threads, "test-worker").expect("spawn test pool");
    Dataflow::builder()
        .name("pooled-test")
        .executor(Arc::new(pool))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_name_dataflows() {
        assert_eq!(inline_dataflow().name(), Some("inline-test"));
        assert_eq!(pooled_dataflow(1).name(), Some("pooled-test"));
    }
}
