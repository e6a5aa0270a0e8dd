//! Column width allocation for the record table.

use unicode_width::UnicodeWidthStr;

/// Narrowest a data column is allowed to get while space can be stolen from
/// wider ones.
pub const MIN_COLUMN_WIDTH: usize = 10;

/// Width of the leading mark column.
pub const MARKER_WIDTH: usize = 2;

/// Ideal width of every column: the widest of its header and cells, in
/// terminal cells.
pub fn ideal_widths(headers: &[String], rows: &[Vec<String>]) -> Vec<usize> {
    headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.width())
                .fold(header.width(), usize::max)
        })
        .collect()
}

/// Split `available` cells between columns.
///
/// With `has_marker` the first entry of `ideal` is the mark column: it is
/// always [`MARKER_WIDTH`] wide and the data columns share `available`
/// among themselves, after which columns above the floor give up the
/// marker's two cells.
pub fn allocate_widths(ideal: &[usize], available: usize, has_marker: bool) -> Vec<usize> {
    let (marker, data) = if has_marker && !ideal.is_empty() {
        (Some(MARKER_WIDTH), &ideal[1..])
    } else {
        (None, ideal)
    };

    let mut widths = proportional(data, available);
    enforce_floor(&mut widths);

    if marker.is_some() && !widths.is_empty() {
        pay_for_marker(&mut widths);
    }

    marker.into_iter().chain(widths).collect()
}

/// Take the marker's cells one at a time from the widest column above the
/// floor. Only when every column sits at the floor does the rest come out
/// of the widest one, clamped at zero.
fn pay_for_marker(widths: &mut [usize]) {
    let mut owed = MARKER_WIDTH;
    while owed > 0 {
        let widest = widest_index(widths);
        if widths[widest] <= MIN_COLUMN_WIDTH {
            widths[widest] = widths[widest].saturating_sub(owed);
            return;
        }
        widths[widest] -= 1;
        owed -= 1;
    }
}

fn proportional(ideal: &[usize], available: usize) -> Vec<usize> {
    let count = ideal.len();
    if count == 0 {
        return Vec::new();
    }

    let total: usize = ideal.iter().sum();
    let mut widths: Vec<usize> = if total == 0 {
        vec![available / count; count]
    } else {
        ideal.iter().map(|w| w * available / total).collect()
    };

    let mut remainder = available - widths.iter().sum::<usize>();
    for width in widths.iter_mut() {
        if remainder == 0 {
            break;
        }
        *width += 1;
        remainder -= 1;
    }
    widths
}

/// Leftmost index of the largest width.
fn widest_index(widths: &[usize]) -> usize {
    let mut best = 0;
    for (idx, &width) in widths.iter().enumerate() {
        if width > widths[best] {
            best = idx;
        }
    }
    best
}

fn enforce_floor(widths: &mut [usize]) {
    let mut needed = 0;
    for width in widths.iter_mut() {
        if *width < MIN_COLUMN_WIDTH {
            needed += MIN_COLUMN_WIDTH - *width;
            *width = MIN_COLUMN_WIDTH;
        }
    }

    while needed > 0 {
        let widest = widest_index(widths);
        if widths[widest] <= MIN_COLUMN_WIDTH {
            break;
        }
        widths[widest] -= 1;
        needed -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surplus_is_proportional() {
        assert_eq!(allocate_widths(&[10, 30], 80, false), vec![20, 60]);
    }

    #[test]
    fn test_remainder_goes_left_to_right() {
        // 100 * 33 / 99 = 33 each, one cell left over
        assert_eq!(allocate_widths(&[33, 33, 33], 100, false), vec![34, 33, 33]);
    }

    #[test]
    fn test_shrinks_when_too_wide() {
        let widths = allocate_widths(&[100, 50, 50], 100, false);
        assert_eq!(widths, vec![50, 25, 25]);
    }

    #[test]
    fn test_floor_steals_from_widest() {
        let widths = allocate_widths(&[2, 96], 60, false);
        // proportional gives [2, 58]; the floor lifts the first to 10 at the second's expense
        assert_eq!(widths, vec![10, 50]);
    }

    #[test]
    fn test_zero_ideal_splits_evenly() {
        assert_eq!(allocate_widths(&[0, 0, 0], 40, false), vec![14, 13, 13]);
    }

    #[test]
    fn test_marker_is_fixed_and_paid_by_widest() {
        let widths = allocate_widths(&[1, 20, 60], 80, true);
        assert_eq!(widths, vec![2, 20, 58]);
        assert_eq!(widths.iter().sum::<usize>(), 80);
    }

    #[test]
    fn test_floor_holds_when_space_allows() {
        for available in [30usize, 47, 80, 200] {
            let widths = allocate_widths(&[1, 2, 300], available, false);
            assert!(widths.iter().all(|&w| w >= MIN_COLUMN_WIDTH));
            assert!(widths.iter().sum::<usize>() <= available);
        }
    }

    #[test]
    fn test_floor_holds_with_marker_when_space_allows() {
        for columns in 1..=8usize {
            let mut ideal = vec![1];
            ideal.extend((0..columns).map(|i| i * 7 + 1));
            let available = MIN_COLUMN_WIDTH * (columns + 1);
            let widths = allocate_widths(&ideal, available, true);
            assert_eq!(widths[0], MARKER_WIDTH);
            assert!(widths[1..].iter().all(|&w| w >= MIN_COLUMN_WIDTH));
            assert_eq!(widths.iter().sum::<usize>(), available);
        }
    }

    #[test]
    fn test_marker_cells_skip_columns_at_the_floor() {
        // the floor leaves [10, 11, 11]; each 11 gives up one cell
        assert_eq!(allocate_widths(&[1, 1, 100, 100], 32, true), vec![2, 10, 10, 10]);
    }

    #[test]
    fn test_marker_clamps_when_nothing_is_above_the_floor() {
        assert_eq!(allocate_widths(&[1, 1, 100], 21, true), vec![2, 9, 10]);
        assert_eq!(allocate_widths(&[1, 5, 5], 12, true), vec![2, 8, 10]);
    }

    #[test]
    fn test_narrow_terminal_keeps_floor_over_fit() {
        let widths = allocate_widths(&[5, 5, 5], 12, false);
        assert_eq!(widths, vec![10, 10, 10]);
    }

    #[test]
    fn test_ideal_widths_use_display_width() {
        let headers = vec![".name".to_string(), ".n".to_string()];
        let rows = vec![
            vec!["日本語".to_string(), "1".to_string()],
            vec!["ab".to_string(), "12345".to_string()],
        ];
        assert_eq!(ideal_widths(&headers, &rows), vec![6, 5]);
    }

    #[test]
    fn test_empty_input() {
        assert!(allocate_widths(&[], 50, false).is_empty());
        assert_eq!(allocate_widths(&[1], 50, true), vec![2]);
    }
}
