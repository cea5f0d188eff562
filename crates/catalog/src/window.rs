/// A contiguous, inclusive range of provider offsets.
///
/// Stored half-open internally so the empty window needs no sentinel;
/// `lower()`/`upper()` expose the inclusive bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestWindow {
    start: usize,
    end: usize,
}

impl RequestWindow {
    /// Window covering `[lower, upper]`; empty when `upper < lower`.
    pub fn new(lower: usize, upper: usize) -> Self {
        if upper < lower {
            Self::empty()
        } else {
            Self {
                start: lower,
                end: upper + 1,
            }
        }
    }

    pub fn single(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn empty() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn lower(&self) -> Option<usize> {
        (!self.is_empty()).then_some(self.start)
    }

    pub fn upper(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.end - 1)
    }

    /// First offset, meaningful only for non-empty windows.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Grows the window by one at the top, or makes it `[offset, offset]`
    /// when it is empty.
    pub fn extend(&mut self, offset: usize) {
        if self.is_empty() {
            *self = Self::single(offset);
        } else {
            self.end += 1;
        }
    }

    /// Splits around `offset`, returning the parts strictly below and
    /// strictly above it. Either part may be empty.
    pub fn split_at(&self, offset: usize) -> (RequestWindow, RequestWindow) {
        if self.is_empty() {
            return (Self::empty(), Self::empty());
        }
        let below = Self {
            start: self.start,
            end: offset.clamp(self.start, self.end),
        };
        let above_start = offset.saturating_add(1).clamp(self.start, self.end);
        let above = Self {
            start: above_start,
            end: self.end,
        };
        (normalize(below), normalize(above))
    }

    /// Removes up to `n` offsets from the bottom and returns them.
    pub fn take_low(&mut self, n: usize) -> RequestWindow {
        let n = n.min(self.len());
        let taken = Self {
            start: self.start,
            end: self.start + n,
        };
        self.start += n;
        *self = normalize(*self);
        normalize(taken)
    }

    /// Removes up to `n` offsets from the top and returns them.
    pub fn take_high(&mut self, n: usize) -> RequestWindow {
        let n = n.min(self.len());
        let taken = Self {
            start: self.end - n,
            end: self.end,
        };
        self.end -= n;
        *self = normalize(*self);
        normalize(taken)
    }

    /// True when the two windows touch without overlapping.
    pub fn is_adjacent(&self, other: &RequestWindow) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.end == other.start || other.end == self.start
    }

    pub fn intersects(&self, other: &RequestWindow) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.start < other.end && other.start < self.end
    }

    /// Smallest window covering both.
    pub fn hull(&self, other: &RequestWindow) -> RequestWindow {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn offsets(&self) -> std::ops::Range<usize> {
        self.start..self.end.max(self.start)
    }
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for RequestWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.lower(), self.upper()) {
            (Some(lower), Some(upper)) => write!(f, "[{},{}]", lower, upper),
            _ => f.write_str("[]"),
        }
    }
}

fn normalize(window: RequestWindow) -> RequestWindow {
    if window.is_empty() {
        RequestWindow::empty()
    } else {
        window
    }
}

#[cfg(test)]
mod tests {
    use super::RequestWindow;

    #[test]
    fn empty_iff_upper_below_lower() {
        assert!(RequestWindow::new(5, 4).is_empty());
        assert!(!RequestWindow::new(5, 5).is_empty());
        assert_eq!(RequestWindow::new(2, 6).len(), 5);
        assert_eq!(RequestWindow::empty().upper(), None);
        assert_eq!(RequestWindow::new(0, 0).upper(), Some(0));
    }

    #[test]
    fn extend_grows_upper_or_starts_singleton() {
        let mut window = RequestWindow::empty();
        window.extend(8);
        assert_eq!(window, RequestWindow::single(8));
        window.extend(9);
        assert_eq!(window, RequestWindow::new(8, 9));
        assert!(window.contains(9));
        assert!(!window.contains(10));
    }

    #[test]
    fn split_excludes_the_cut_offset() {
        let window = RequestWindow::new(0, 9);
        assert_eq!(
            window.split_at(4),
            (RequestWindow::new(0, 3), RequestWindow::new(5, 9))
        );
        assert_eq!(
            window.split_at(0),
            (RequestWindow::empty(), RequestWindow::new(1, 9))
        );
        assert_eq!(
            window.split_at(9),
            (RequestWindow::new(0, 8), RequestWindow::empty())
        );
        assert_eq!(
            window.split_at(20),
            (RequestWindow::new(0, 9), RequestWindow::empty())
        );
    }

    #[test]
    fn take_from_either_end() {
        let mut window = RequestWindow::new(10, 19);
        assert_eq!(window.take_high(3), RequestWindow::new(17, 19));
        assert_eq!(window, RequestWindow::new(10, 16));
        assert_eq!(window.take_low(2), RequestWindow::new(10, 11));
        assert_eq!(window, RequestWindow::new(12, 16));
        assert_eq!(window.take_low(50), RequestWindow::new(12, 16));
        assert!(window.is_empty());
    }

    #[test]
    fn adjacency_and_intersection() {
        let low = RequestWindow::new(0, 4);
        let high = RequestWindow::new(5, 9);
        let overlap = RequestWindow::new(4, 6);
        assert!(low.is_adjacent(&high));
        assert!(high.is_adjacent(&low));
        assert!(!low.intersects(&high));
        assert!(low.intersects(&overlap));
        assert!(!low.is_adjacent(&overlap));
        assert_eq!(low.hull(&high), RequestWindow::new(0, 9));
        assert!(!RequestWindow::empty().is_adjacent(&low));
    }

    #[test]
    fn displays_inclusive_bounds() {
        assert_eq!(RequestWindow::new(3, 7).to_string(), "[3,7]");
        assert_eq!(RequestWindow::empty().to_string(), "[]");
    }
}
