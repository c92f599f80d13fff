// THEORY:
// `ObjectDetails` is the common currency between every stage of the engine: the
// chroma filter produces a coarse one, the hull engine produces a refined one, the
// tracker averages them, and the post processor reports two of them. It is a
// "dumb" data container, rebuilt from scratch for every detection attempt.

/// A pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The best estimate of one candidate object's extent in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectDetails {
    /// Compacted label of the component, or 0 when the estimate did not come from a label.
    pub id: u32,
    /// Number of selected pixels, or polygon area for hull-derived details.
    pub area: u32,
    pub width: u32,
    pub height: u32,
    pub center_x: u32,
    pub center_y: u32,
}

impl ObjectDetails {
    /// A zero width always means "nothing found", never a zero-size object.
    pub fn is_found(&self) -> bool {
        self.width > 0
    }
}

/// Row/column tally used by both the chroma filter and the hull engine.
///
/// The row holding the most selected pixels gives `center_y` and its count is the
/// width proxy; the column holding the most gives `center_x` and the height proxy.
/// Ties keep the first (lowest) index.
#[derive(Debug, Clone)]
pub struct SelectionTally {
    row_counts: Vec<u32>,
    column_counts: Vec<u32>,
    row_offset: u32,
    column_offset: u32,
    total: u32,
}

impl SelectionTally {
    /// A tally covering columns `[x0, x0 + width)` and rows `[y0, y0 + height)`.
    pub fn new(x0: u32, y0: u32, width: usize, height: usize) -> Self {
        Self {
            row_counts: vec![0; height],
            column_counts: vec![0; width],
            row_offset: y0,
            column_offset: x0,
            total: 0,
        }
    }

    #[inline]
    pub fn add(&mut self, x: u32, y: u32) {
        self.row_counts[(y - self.row_offset) as usize] += 1;
        self.column_counts[(x - self.column_offset) as usize] += 1;
        self.total += 1;
    }

    fn busiest(counts: &[u32]) -> Option<(usize, u32)> {
        counts
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (index, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ if count > 0 => Some((index, count)),
                _ => best,
            })
    }

    /// `None` unless at least one pixel was tallied.
    pub fn estimate(&self, id: u32) -> Option<ObjectDetails> {
        let (row, width) = Self::busiest(&self.row_counts)?;
        let (column, height) = Self::busiest(&self.column_counts)?;
        Some(ObjectDetails {
            id,
            area: self.total,
            width,
            height,
            center_x: column as u32 + self.column_offset,
            center_y: row as u32 + self.row_offset,
        })
    }
}
