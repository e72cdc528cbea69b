// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Authenticated radix-16 trie over a content-addressed node store.
//!
//! Nodes are immutable and keyed by the Keccak-256 of their canonical
//! encoding, so every root hash names a full state snapshot and old
//! snapshots stay readable after updates. The empty trie is the zero
//! hash. Structure is canonical for a given key set: an extension always
//! points at a branch, and branches hold at least two slots (or one slot
//! plus a value), which makes the root independent of insertion order.

use crate::chain::cache::Layer;
use crate::chain::KvStoreErr;
use crate::primitives::{keccak256, Hash256};
use bincode::{Decode, Encode};

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
enum TrieNode {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: Hash256,
    },
    Branch {
        children: [Option<Hash256>; 16],
        value: Option<Vec<u8>>,
    },
}

enum DeleteOutcome {
    NotFound,
    Removed(Option<Hash256>),
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for byte in key {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn store_node<L: Layer<Hash256, Vec<u8>>>(store: &mut L, node: &TrieNode) -> Hash256 {
    let bytes = crate::codec::encode_to_vec(node).unwrap();
    let hash = keccak256(&bytes);
    store.put(hash, bytes);
    hash
}

fn load_node<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    hash: &Hash256,
) -> Result<TrieNode, KvStoreErr> {
    let bytes = store
        .get(hash)?
        .ok_or(KvStoreErr::Error("missing trie node"))?;
    Ok(crate::codec::decode(&bytes)?)
}

/// Reads `key` from the snapshot named by `root`.
pub fn get<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    root: &Hash256,
    key: &[u8],
) -> Result<Option<Vec<u8>>, KvStoreErr> {
    if root.is_zero() {
        return Ok(None);
    }

    get_node(store, root, &to_nibbles(key))
}

fn get_node<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    hash: &Hash256,
    path: &[u8],
) -> Result<Option<Vec<u8>>, KvStoreErr> {
    match load_node(store, hash)? {
        TrieNode::Leaf { path: lpath, value } => {
            Ok(if lpath == path { Some(value) } else { None })
        }

        TrieNode::Extension { path: epath, child } => {
            if path.len() >= epath.len() && path[..epath.len()] == epath[..] {
                get_node(store, &child, &path[epath.len()..])
            } else {
                Ok(None)
            }
        }

        TrieNode::Branch { children, value } => {
            if path.is_empty() {
                return Ok(value);
            }

            match &children[path[0] as usize] {
                None => Ok(None),
                Some(child) => get_node(store, child, &path[1..]),
            }
        }
    }
}

/// Writes `key -> value` and returns the new root.
pub fn insert<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    root: &Hash256,
    key: &[u8],
    value: Vec<u8>,
) -> Result<Hash256, KvStoreErr> {
    let node = if root.is_zero() { None } else { Some(*root) };
    insert_node(store, node, &to_nibbles(key), value)
}

fn insert_node<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    node: Option<Hash256>,
    path: &[u8],
    value: Vec<u8>,
) -> Result<Hash256, KvStoreErr> {
    let Some(hash) = node else {
        return Ok(store_node(
            store,
            &TrieNode::Leaf {
                path: path.to_vec(),
                value,
            },
        ));
    };

    match load_node(store, &hash)? {
        TrieNode::Leaf {
            path: lpath,
            value: lvalue,
        } => {
            if lpath == path {
                return Ok(store_node(
                    store,
                    &TrieNode::Leaf {
                        path: path.to_vec(),
                        value,
                    },
                ));
            }

            let common = common_prefix(&lpath, path);
            let mut children: [Option<Hash256>; 16] = Default::default();
            let mut branch_value = None;

            for (p, v) in [(lpath, lvalue), (path.to_vec(), value)] {
                if p.len() == common {
                    branch_value = Some(v);
                } else {
                    let nibble = p[common] as usize;
                    children[nibble] = Some(store_node(
                        store,
                        &TrieNode::Leaf {
                            path: p[common + 1..].to_vec(),
                            value: v,
                        },
                    ));
                }
            }

            let branch = store_node(
                store,
                &TrieNode::Branch {
                    children,
                    value: branch_value,
                },
            );
            Ok(wrap_extension(store, &path[..common], branch))
        }

        TrieNode::Extension {
            path: epath,
            child: echild,
        } => {
            let common = common_prefix(&epath, path);

            if common == epath.len() {
                let child = insert_node(store, Some(echild), &path[common..], value)?;
                return Ok(store_node(
                    store,
                    &TrieNode::Extension { path: epath, child },
                ));
            }

            // Split the extension at the fork point
            let mut children: [Option<Hash256>; 16] = Default::default();
            let mut branch_value = None;

            let enibble = epath[common] as usize;
            let erest = &epath[common + 1..];
            children[enibble] = Some(if erest.is_empty() {
                echild
            } else {
                store_node(
                    store,
                    &TrieNode::Extension {
                        path: erest.to_vec(),
                        child: echild,
                    },
                )
            });

            if path.len() == common {
                branch_value = Some(value);
            } else {
                let nibble = path[common] as usize;
                children[nibble] = Some(insert_node(store, None, &path[common + 1..], value)?);
            }

            let branch = store_node(
                store,
                &TrieNode::Branch {
                    children,
                    value: branch_value,
                },
            );
            Ok(wrap_extension(store, &path[..common], branch))
        }

        TrieNode::Branch {
            mut children,
            value: bvalue,
        } => {
            if path.is_empty() {
                return Ok(store_node(
                    store,
                    &TrieNode::Branch {
                        children,
                        value: Some(value),
                    },
                ));
            }

            let nibble = path[0] as usize;
            children[nibble] = Some(insert_node(store, children[nibble], &path[1..], value)?);
            Ok(store_node(
                store,
                &TrieNode::Branch {
                    children,
                    value: bvalue,
                },
            ))
        }
    }
}

fn wrap_extension<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    prefix: &[u8],
    branch: Hash256,
) -> Hash256 {
    if prefix.is_empty() {
        branch
    } else {
        store_node(
            store,
            &TrieNode::Extension {
                path: prefix.to_vec(),
                child: branch,
            },
        )
    }
}

/// Removes `key` and returns the new root (zero hash when the trie
/// becomes empty). Removing an absent key leaves the root unchanged.
pub fn remove<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    root: &Hash256,
    key: &[u8],
) -> Result<Hash256, KvStoreErr> {
    if root.is_zero() {
        return Ok(*root);
    }

    match delete_node(store, root, &to_nibbles(key))? {
        DeleteOutcome::NotFound => Ok(*root),
        DeleteOutcome::Removed(Some(hash)) => Ok(hash),
        DeleteOutcome::Removed(None) => Ok(Hash256::zero()),
    }
}

fn delete_node<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    hash: &Hash256,
    path: &[u8],
) -> Result<DeleteOutcome, KvStoreErr> {
    match load_node(store, hash)? {
        TrieNode::Leaf { path: lpath, .. } => {
            if lpath == path {
                Ok(DeleteOutcome::Removed(None))
            } else {
                Ok(DeleteOutcome::NotFound)
            }
        }

        TrieNode::Extension {
            path: epath,
            child: echild,
        } => {
            if path.len() < epath.len() || path[..epath.len()] != epath[..] {
                return Ok(DeleteOutcome::NotFound);
            }

            match delete_node(store, &echild, &path[epath.len()..])? {
                DeleteOutcome::NotFound => Ok(DeleteOutcome::NotFound),
                DeleteOutcome::Removed(None) => Ok(DeleteOutcome::Removed(None)),
                DeleteOutcome::Removed(Some(child)) => {
                    let merged = merge_extension(store, epath, child)?;
                    Ok(DeleteOutcome::Removed(Some(merged)))
                }
            }
        }

        TrieNode::Branch {
            mut children,
            value,
        } => {
            if path.is_empty() {
                if value.is_none() {
                    return Ok(DeleteOutcome::NotFound);
                }

                let normalized = normalize_branch(store, children, None)?;
                return Ok(DeleteOutcome::Removed(normalized));
            }

            let nibble = path[0] as usize;
            let Some(child) = children[nibble] else {
                return Ok(DeleteOutcome::NotFound);
            };

            match delete_node(store, &child, &path[1..])? {
                DeleteOutcome::NotFound => Ok(DeleteOutcome::NotFound),
                DeleteOutcome::Removed(new_child) => {
                    children[nibble] = new_child;
                    let normalized = normalize_branch(store, children, value)?;
                    Ok(DeleteOutcome::Removed(normalized))
                }
            }
        }
    }
}

/// Prepends `prefix` to a subtree that replaced an extension's child.
fn merge_extension<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    prefix: Vec<u8>,
    child: Hash256,
) -> Result<Hash256, KvStoreErr> {
    match load_node(store, &child)? {
        TrieNode::Leaf { path, value } => {
            let mut merged = prefix;
            merged.extend_from_slice(&path);
            Ok(store_node(
                store,
                &TrieNode::Leaf {
                    path: merged,
                    value,
                },
            ))
        }

        TrieNode::Extension { path, child } => {
            let mut merged = prefix;
            merged.extend_from_slice(&path);
            Ok(store_node(
                store,
                &TrieNode::Extension {
                    path: merged,
                    child,
                },
            ))
        }

        TrieNode::Branch { .. } => Ok(store_node(
            store,
            &TrieNode::Extension {
                path: prefix,
                child,
            },
        )),
    }
}

/// Re-establishes canonical structure after a branch lost a slot.
fn normalize_branch<L: Layer<Hash256, Vec<u8>>>(
    store: &mut L,
    children: [Option<Hash256>; 16],
    value: Option<Vec<u8>>,
) -> Result<Option<Hash256>, KvStoreErr> {
    let occupied: Vec<usize> = children
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.as_ref().map(|_| i))
        .collect();

    match (occupied.len(), &value) {
        (0, None) => Ok(None),

        (0, Some(_)) => Ok(Some(store_node(
            store,
            &TrieNode::Leaf {
                path: vec![],
                value: value.unwrap(),
            },
        ))),

        (1, None) => {
            let nibble = occupied[0];
            let child = children[nibble].unwrap();
            let merged = merge_extension(store, vec![nibble as u8], child)?;
            Ok(Some(merged))
        }

        _ => Ok(Some(store_node(
            store,
            &TrieNode::Branch { children, value },
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::backend::{ColumnFamily, KeyValueStore, MemoryBackend};
    use crate::chain::cache::Cache;
    use std::sync::Arc;

    fn node_cache() -> Cache<Hash256, Vec<u8>> {
        let backend = Arc::new(MemoryBackend::new());
        Cache::new(backend as Arc<dyn KeyValueStore>, ColumnFamily::WorldState)
    }

    #[test]
    fn empty_trie_reads_nothing() {
        let mut store = node_cache();
        assert_eq!(get(&mut store, &Hash256::zero(), b"k").unwrap(), None);
        assert_eq!(
            remove(&mut store, &Hash256::zero(), b"k").unwrap(),
            Hash256::zero()
        );
    }

    #[test]
    fn insert_get_remove_single_key() {
        let mut store = node_cache();
        let root = insert(&mut store, &Hash256::zero(), b"key", b"value".to_vec()).unwrap();

        assert_ne!(root, Hash256::zero());
        assert_eq!(
            get(&mut store, &root, b"key").unwrap().as_deref(),
            Some(b"value".as_slice())
        );
        assert_eq!(get(&mut store, &root, b"other").unwrap(), None);

        let root = remove(&mut store, &root, b"key").unwrap();
        assert_eq!(root, Hash256::zero());
    }

    #[test]
    fn overwrite_changes_the_root() {
        let mut store = node_cache();
        let root1 = insert(&mut store, &Hash256::zero(), b"key", b"a".to_vec()).unwrap();
        let root2 = insert(&mut store, &root1, b"key", b"b".to_vec()).unwrap();

        assert_ne!(root1, root2);
        assert_eq!(
            get(&mut store, &root2, b"key").unwrap().as_deref(),
            Some(b"b".as_slice())
        );
        // Old snapshot still readable
        assert_eq!(
            get(&mut store, &root1, b"key").unwrap().as_deref(),
            Some(b"a".as_slice())
        );
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let keys: Vec<Vec<u8>> = vec![
            b"abcd".to_vec(),
            b"abce".to_vec(),
            b"ab".to_vec(),
            b"xyz".to_vec(),
            b"x".to_vec(),
            vec![0x00, 0x01],
            vec![0x00],
            vec![0xff; 32],
        ];

        let mut store_a = node_cache();
        let mut root_a = Hash256::zero();
        for key in &keys {
            root_a = insert(&mut store_a, &root_a, key, key.clone()).unwrap();
        }

        let mut store_b = node_cache();
        let mut root_b = Hash256::zero();
        for key in keys.iter().rev() {
            root_b = insert(&mut store_b, &root_b, key, key.clone()).unwrap();
        }

        assert_eq!(root_a, root_b);

        for key in &keys {
            assert_eq!(
                get(&mut store_a, &root_a, key).unwrap().as_deref(),
                Some(key.as_slice())
            );
        }
    }

    #[test]
    fn removal_restores_the_previous_root() {
        let keys: Vec<Vec<u8>> = (0u16..40)
            .map(|i| {
                let mut k = vec![(i % 7) as u8];
                k.extend_from_slice(&i.to_be_bytes());
                k
            })
            .collect();

        let mut store = node_cache();
        let mut root = Hash256::zero();
        let mut roots = vec![root];

        for key in &keys {
            root = insert(&mut store, &root, key, b"v".to_vec()).unwrap();
            roots.push(root);
        }

        // Remove in reverse and walk the root history backwards
        for (key, expected) in keys.iter().rev().zip(roots.iter().rev().skip(1)) {
            root = remove(&mut store, &root, key).unwrap();
            assert_eq!(&root, expected);
        }

        assert_eq!(root, Hash256::zero());
    }

    #[test]
    fn removing_an_absent_key_is_a_no_op() {
        let mut store = node_cache();
        let root = insert(&mut store, &Hash256::zero(), b"key", b"v".to_vec()).unwrap();

        assert_eq!(remove(&mut store, &root, b"absent").unwrap(), root);
        assert_eq!(remove(&mut store, &root, b"ke").unwrap(), root);
        assert_eq!(remove(&mut store, &root, b"keyy").unwrap(), root);
    }

    #[test]
    fn prefix_keys_coexist() {
        let mut store = node_cache();
        let mut root = Hash256::zero();
        root = insert(&mut store, &root, b"a", b"1".to_vec()).unwrap();
        root = insert(&mut store, &root, b"ab", b"2".to_vec()).unwrap();
        root = insert(&mut store, &root, b"abc", b"3".to_vec()).unwrap();

        assert_eq!(get(&mut store, &root, b"a").unwrap().as_deref(), Some(b"1".as_slice()));
        assert_eq!(get(&mut store, &root, b"ab").unwrap().as_deref(), Some(b"2".as_slice()));
        assert_eq!(get(&mut store, &root, b"abc").unwrap().as_deref(), Some(b"3".as_slice()));

        root = remove(&mut store, &root, b"ab").unwrap();
        assert_eq!(get(&mut store, &root, b"ab").unwrap(), None);
        assert_eq!(get(&mut store, &root, b"a").unwrap().as_deref(), Some(b"1".as_slice()));
        assert_eq!(get(&mut store, &root, b"abc").unwrap().as_deref(), Some(b"3".as_slice()));
    }
}
