use rand::{rngs::StdRng, Rng, SeedableRng};
use sgtree::{SGTree, TreeError};

fn build(n: usize, seed: u64) -> (SGTree<2>, Vec<[f64; 2]>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::new();
    let mut points = Vec::new();
    for _ in 0..n {
        let point = [rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)];
        data.extend_from_slice(&point);
        points.push(point);
    }
    (SGTree::from_matrix(&data, 1).unwrap(), points)
}

#[test]
fn msg_size_is_exact_from_empty_to_large() {
    let empty: SGTree<2> = SGTree::new();
    assert_eq!(empty.msg_size(), empty.serialize().len());

    for n in [1, 2, 17, 500] {
        let (tree, _) = build(n, n as u64);
        assert_eq!(tree.msg_size(), tree.serialize().len());
    }
}

#[test]
fn round_trip_preserves_structure_and_answers() {
    let (tree, _) = build(300, 11);
    let buf = tree.serialize();
    let restored = SGTree::<2>::deserialize(&buf).unwrap();

    assert_eq!(restored.len(), tree.len());
    assert_eq!(restored.min_scale(), tree.min_scale());
    assert_eq!(restored.max_scale(), tree.max_scale());
    assert!(restored.check_covering());

    // A fixed battery of queries answers identically on both trees.
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..25 {
        let query = [rng.gen_range(-100.0..100.0), rng.gen_range(-100.0..100.0)];

        let (a, da) = tree.nearest_neighbour(&query).unwrap();
        let (b, db) = restored.nearest_neighbour(&query).unwrap();
        assert_eq!(a.uid(), b.uid());
        assert_eq!(da, db);

        let ka: Vec<(usize, u64)> = tree
            .k_nearest_neighbours(&query, 8)
            .iter()
            .map(|(n, d)| (n.uid(), d.to_bits()))
            .collect();
        let kb: Vec<(usize, u64)> = restored
            .k_nearest_neighbours(&query, 8)
            .iter()
            .map(|(n, d)| (n.uid(), d.to_bits()))
            .collect();
        assert_eq!(ka, kb);

        let mut ra: Vec<usize> = tree
            .range_neighbours(&query, 25.0)
            .iter()
            .map(|(n, _)| n.uid())
            .collect();
        let mut rb: Vec<usize> = restored
            .range_neighbours(&query, 25.0)
            .iter()
            .map(|(n, _)| n.uid())
            .collect();
        ra.sort_unstable();
        rb.sort_unstable();
        assert_eq!(ra, rb);
    }

    // Serializing the restored tree reproduces the buffer bit for bit.
    assert_eq!(restored.serialize(), buf);
}

#[test]
fn truncated_tree_round_trips_with_its_floor() {
    let data: Vec<f64> = (0..160).map(|i| f64::from(i) * 0.125).collect();
    let tree = SGTree::<2>::from_matrix_with(&data, 1.3, Some(2), 1, false).unwrap();
    assert!(tree.check_covering());

    let buf = tree.serialize();
    let restored = SGTree::<2>::deserialize(&buf).unwrap();
    assert_eq!(restored.len(), tree.len());
    assert_eq!(restored.min_scale(), tree.min_scale());

    // Separation is relaxed below the truncation floor; the restored tree
    // must remember that, not re-check it.
    assert!(restored.check_covering());
    assert_eq!(restored.serialize(), buf);

    // The floor also still binds further insertions.
    for i in 0..40 {
        restored.insert([f64::from(i) * 0.0625 + 0.03, 0.0], 1000 + i as usize);
    }
    assert!(restored.min_scale() >= restored.max_scale() - 2);
    assert!(restored.check_covering());
}

#[test]
fn deserialize_rejects_bad_buffers() {
    let (tree, _) = build(20, 3);
    let buf = tree.serialize();

    assert!(matches!(
        SGTree::<2>::deserialize(&buf[..10]).unwrap_err(),
        TreeError::BufferSize { .. }
    ));

    let mut wrong_magic = buf.clone();
    wrong_magic[0] = b'X';
    assert_eq!(
        SGTree::<2>::deserialize(&wrong_magic).unwrap_err(),
        TreeError::BadMagic
    );

    assert_eq!(
        SGTree::<3>::deserialize(&buf).unwrap_err(),
        TreeError::WrongDimension { expected: 3, got: 2 }
    );

    let mut oversize = buf.clone();
    oversize.push(0);
    assert!(matches!(
        SGTree::<2>::deserialize(&oversize).unwrap_err(),
        TreeError::BufferSize { .. }
    ));
}
