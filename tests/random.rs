use rand::{rngs::StdRng, Rng, SeedableRng};
use sgtree::SGTree;

fn euclidean(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[test]
fn test_random() {
    let tree: SGTree<3> = SGTree::new();

    let num_ops = 400;
    let mut rng = StdRng::seed_from_u64(0);
    let mut points: Vec<[f64; 3]> = Vec::new();

    for uid in 0..num_ops {
        let point = [
            rng.gen_range(-100.0..100.0),
            rng.gen_range(-100.0..100.0),
            rng.gen_range(-100.0..100.0),
        ];
        assert!(tree.insert(point, uid));
        points.push(point);

        // The covering and separation invariants hold after every insertion
        assert!(tree.check_covering());

        // Create a random query point and radius
        let query = [
            rng.gen_range(-100.0..100.0),
            rng.gen_range(-100.0..100.0),
            rng.gen_range(-100.0..100.0),
        ];
        let radius = rng.gen_range(20.0..60.0);

        // Nearest neighbor matches the brute-force minimum
        let expected_nn = points
            .iter()
            .map(|p| euclidean(p, &query))
            .fold(f64::INFINITY, f64::min);
        let (_, dist) = tree.nearest_neighbour(&query).unwrap();
        assert_eq!(dist, expected_nn);

        // Furthest neighbor matches the brute-force maximum
        let expected_fn = points
            .iter()
            .map(|p| euclidean(p, &query))
            .fold(0.0, f64::max);
        let (_, dist) = tree.furthest_neighbour(&query).unwrap();
        assert_eq!(dist, expected_fn);

        // Range query returns exactly the points within the radius
        let mut expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| euclidean(p, &query) <= radius)
            .map(|(uid, _)| uid)
            .collect();
        expected.sort_unstable();
        let mut actual: Vec<usize> = tree
            .range_neighbours(&query, radius)
            .iter()
            .map(|(n, _)| n.uid())
            .collect();
        actual.sort_unstable();
        assert_eq!(expected, actual);
    }
}

#[test]
fn test_knn_matches_bruteforce() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut data = Vec::new();
    let mut points: Vec<[f64; 3]> = Vec::new();
    for _ in 0..300 {
        let point = [
            rng.gen_range(-50.0..50.0),
            rng.gen_range(-50.0..50.0),
            rng.gen_range(-50.0..50.0),
        ];
        data.extend_from_slice(&point);
        points.push(point);
    }
    let tree = SGTree::<3>::from_matrix(&data, 1).unwrap();
    assert_eq!(tree.len(), points.len());

    for _ in 0..50 {
        let query = [
            rng.gen_range(-50.0..50.0),
            rng.gen_range(-50.0..50.0),
            rng.gen_range(-50.0..50.0),
        ];
        let k = rng.gen_range(1..20);

        let mut expected: Vec<f64> = points.iter().map(|p| euclidean(p, &query)).collect();
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        expected.truncate(k);

        let actual = tree.k_nearest_neighbours(&query, k);
        assert_eq!(actual.len(), k.min(points.len()));
        let distances: Vec<f64> = actual.iter().map(|(_, d)| *d).collect();
        assert_eq!(distances, expected);
    }
}

#[test]
fn test_beam_recall_and_bounds() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut data = Vec::new();
    for _ in 0..500 {
        data.push(rng.gen_range(-100.0..100.0));
        data.push(rng.gen_range(-100.0..100.0));
    }
    let tree = SGTree::<2>::from_matrix(&data, 1).unwrap();
    let query = [0.0, 0.0];
    let k = 10;

    let exact: Vec<usize> = tree
        .k_nearest_neighbours(&query, k)
        .iter()
        .map(|(n, _)| n.uid())
        .collect();

    let mut recalls = Vec::new();
    // The last beam width exceeds the point count, so nothing is ever
    // dropped from the frontier and the search degenerates to exact.
    for beam in [1, 4, 16, 512] {
        let approx = tree.k_nearest_neighbours_beam(&query, k, beam);
        // Never more results than requested, never a point not in the tree
        assert!(approx.len() <= k);
        for (node, dist) in &approx {
            assert!(node.uid() < tree.len());
            assert_eq!(*dist, euclidean_2(node.point(), &query));
        }
        let recall = approx
            .iter()
            .filter(|(n, _)| exact.contains(&n.uid()))
            .count();
        recalls.push(recall);
    }
    // A narrow beam never beats a generous one, and a generous beam
    // recovers the exact answer
    assert!(recalls[0] <= *recalls.last().unwrap());
    assert_eq!(*recalls.last().unwrap(), k);
}

fn euclidean_2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
