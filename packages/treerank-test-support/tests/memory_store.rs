use treerank_core::MemoryTreeStore;
use treerank_test_support::run_conformance;

#[test]
fn memory_store_conforms() {
    run_conformance(MemoryTreeStore::new);
}
