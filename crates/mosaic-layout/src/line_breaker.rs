/// Split `widths` into lines no wider than `window_width`, minimising the sum of
/// squared slack over all lines.
///
/// Every item costs its width plus `padding` on both sides. An item wider than
/// the window on its own still gets a line of its own, so the result always
/// covers every item and every entry is at least one.
///
/// # Examples
///
/// ```
/// # use mosaic_layout::break_lines;
/// let lines = break_lines(&[100.0; 7], 320.0, 8.0);
/// assert_eq!(lines, vec![2, 2, 2, 1]);
/// ```
pub fn break_lines(widths: &[f64], window_width: f64, padding: f64) -> Vec<usize> {
    let n = widths.len();
    let mut min_badness = vec![f64::INFINITY; n + 1];
    let mut breaks = vec![0usize; n + 1];
    min_badness[0] = 0.0;

    for i in 1..=n {
        let mut current_width = 0.0;
        for j in (1..=i).rev() {
            current_width += widths[j - 1] + 2.0 * padding;
            if current_width > window_width {
                break;
            }
            let candidate = min_badness[j - 1] + (window_width - current_width).powi(2);
            if candidate < min_badness[i] {
                min_badness[i] = candidate;
                breaks[i] = j - 1;
            }
        }

        // Nothing fit: item i alone overflows the window.
        if min_badness[i] == f64::INFINITY {
            min_badness[i] = min_badness[i - 1] + (window_width - current_width).powi(2);
            breaks[i] = i - 1;
        }
    }

    let mut lines = Vec::new();
    let mut end = n;
    while end > 0 {
        let start = breaks[end];
        lines.push(end - start);
        end = start;
    }
    lines.reverse();
    lines
}
