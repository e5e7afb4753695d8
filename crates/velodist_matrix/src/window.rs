use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::MatrixError;

/// Half-open range `[start, end)` over the station ordering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct IndexWindow {
    pub start: usize,
    pub end: usize,
}

impl IndexWindow {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl From<(usize, usize)> for IndexWindow {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

impl From<IndexWindow> for (usize, usize) {
    fn from(window: IndexWindow) -> Self {
        (window.start, window.end)
    }
}

impl Display for IndexWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Splits `0..n` into consecutive windows of `window_size` stations. The last
/// window holds the remainder and is never empty.
pub fn partition(n: usize, window_size: usize) -> Result<Vec<IndexWindow>, MatrixError> {
    if window_size == 0 {
        return Err(MatrixError::InvalidArgument(String::from(
            "window size must be greater than zero",
        )));
    }

    let windows = (0..n)
        .step_by(window_size)
        .map(|start| IndexWindow::new(start, usize::min(start + window_size, n)))
        .collect();

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(windows: &[IndexWindow], n: usize, window_size: usize) {
        let mut next = 0;
        for (i, window) in windows.iter().enumerate() {
            assert_eq!(window.start, next);
            assert!(!window.is_empty());
            if i + 1 < windows.len() {
                assert_eq!(window.len(), window_size);
            } else {
                assert!(window.len() <= window_size);
            }
            next = window.end;
        }
        assert_eq!(next, n);
    }

    #[test]
    fn test_partition_with_remainder() {
        let windows = partition(3, 2).unwrap();
        assert_eq!(windows, vec![IndexWindow::new(0, 2), IndexWindow::new(2, 3)]);
    }

    #[test]
    fn test_partition_exact_multiple() {
        let windows = partition(160, 80).unwrap();
        assert_eq!(
            windows,
            vec![IndexWindow::new(0, 80), IndexWindow::new(80, 160)]
        );
    }

    #[test]
    fn test_partition_empty() {
        assert!(partition(0, 80).unwrap().is_empty());
    }

    #[test]
    fn test_partition_smaller_than_window() {
        assert_eq!(partition(5, 80).unwrap(), vec![IndexWindow::new(0, 5)]);
    }

    #[test]
    fn test_partition_rejects_zero_window() {
        assert!(matches!(
            partition(10, 0),
            Err(MatrixError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_partition_covers_range() {
        for n in 0..60 {
            for window_size in 1..12 {
                let windows = partition(n, window_size).unwrap();
                assert_eq!(windows.len(), n.div_ceil(window_size));
                assert_covers(&windows, n, window_size);
            }
        }
    }

    #[test]
    fn test_window_serializes_as_pair() {
        let json = serde_json::to_string(&IndexWindow::new(80, 160)).unwrap();
        assert_eq!(json, "[80,160]");

        let window: IndexWindow = serde_json::from_str("[0,2]").unwrap();
        assert_eq!(window, IndexWindow::new(0, 2));
    }
}
