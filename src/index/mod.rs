pub mod btree_index;
pub mod btree_iterator;
pub mod btree_page;
pub mod codec;
pub mod key_comparator;

pub use btree_index::BPlusTree;
pub use btree_iterator::IndexIterator;
pub use btree_page::{
    max_internal_size, max_leaf_size, BTreeHeaderPage, BTreeHeaderPageRef, BTreePageRef,
    BTreePageType, InternalPage, InternalPageRef, LeafPage, LeafPageRef,
};
pub use codec::Storable;
pub use key_comparator::{BytewiseComparator, KeyComparator, U32Comparator, U64Comparator};
