use pretty_assertions::assert_eq;

use super::*;

fn fi(id: u32, dim: usize) -> FreeIndex {
    FreeIndex {
        id: IndexId::new(id),
        dim,
    }
}

#[test]
fn merge_keeps_sorted_union() {
    let a = [fi(1, 2), fi(4, 3)];
    let b = [fi(2, 3), fi(4, 3)];
    let merged = merge_free_indices(&a, &b);
    assert_eq!(merged.as_slice(), &[fi(1, 2), fi(2, 3), fi(4, 3)]);
}

#[test]
#[should_panic(expected = "free index i_4 used with dimensions 3 and 2")]
fn merge_rejects_conflicting_dimensions() {
    merge_free_indices(&[fi(4, 3)], &[fi(4, 2)]);
}

#[test]
fn remove_drops_only_named_index() {
    let free = [fi(1, 2), fi(2, 3)];
    assert_eq!(remove_free_index(&free, IndexId::new(1)).as_slice(), &[fi(2, 3)]);
    assert_eq!(free_index_dim(&free, IndexId::new(2)), Some(3));
    assert_eq!(free_index_dim(&free, IndexId::new(9)), None);
}

#[test]
fn component_enumeration_is_row_major() {
    let comps: Vec<Vec<usize>> = component_indices(&[2, 3])
        .into_iter()
        .map(|c| c.to_vec())
        .collect();
    assert_eq!(
        comps,
        vec![
            vec![0, 0],
            vec![0, 1],
            vec![0, 2],
            vec![1, 0],
            vec![1, 1],
            vec![1, 2]
        ]
    );
    for (k, c) in component_indices(&[2, 3]).iter().enumerate() {
        assert_eq!(flatten_component(c, &[2, 3]), k);
    }
}

#[test]
fn scalar_shape_has_one_component() {
    assert_eq!(component_indices(&[]).len(), 1);
    assert_eq!(shape_size(&[]), 1);
    assert_eq!(free_size(&[]), 1);
}

#[test]
fn fresh_ids_do_not_collide_with_explicit_ids() {
    let a = IndexId::fresh();
    let b = IndexId::fresh();
    assert_ne!(a, b);
    assert!(a.raw() >= 1 << 20);
}
