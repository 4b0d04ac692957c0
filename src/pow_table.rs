/// Offset added to a level to index the power table; levels outside
/// `-OFFSET..=OFFSET` saturate at the table ends.
const OFFSET: i32 = 1024;

/// Precomputed `base^level` for every level the tree can reach.
///
/// Every covering and separating distance is a lookup in this table, so it
/// is built once per tree and shared by all operations.
#[derive(Debug)]
pub struct PowerTable {
    base: f64,
    pow: Vec<f64>,
}

impl PowerTable {
    pub fn new(base: f64) -> PowerTable {
        let pow = (0..=2 * OFFSET).map(|i| base.powi(i - OFFSET)).collect();
        PowerTable { base, pow }
    }

    #[must_use]
    pub fn base(&self) -> f64 {
        self.base
    }

    /// `base^level`, saturating at the table ends.
    #[must_use]
    pub fn pow(&self, level: i32) -> f64 {
        let i = (level + OFFSET).clamp(0, 2 * OFFSET) as usize;
        self.pow[i]
    }

    /// Covering distance of a node at `level`: its children lie within
    /// `base^level` of it.
    #[must_use]
    pub fn covering_distance(&self, level: i32) -> f64 {
        self.pow(level)
    }

    /// Separating distance of a node at `level`: its children are pairwise
    /// farther apart than `base^(level - 1)`.
    #[must_use]
    pub fn separating_distance(&self, level: i32) -> f64 {
        self.pow(level - 1)
    }

    /// Smallest level whose covering distance reaches `dist`.
    #[must_use]
    pub fn level_for(&self, dist: f64) -> i32 {
        if dist <= 0.0 {
            return 0;
        }
        let level = (dist.ln() / self.base.ln()).ceil() as i32;
        level.clamp(-OFFSET, OFFSET)
    }
}
