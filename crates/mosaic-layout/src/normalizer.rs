use crate::DisplayElement;

/// One wrapped line of a row. Only lives for the duration of a layout pass.
#[derive(Debug)]
pub struct SubRow<'a> {
    pub display_elements: &'a mut [DisplayElement],
}

impl<'a> SubRow<'a> {
    /// Carve `elements` into consecutive sub-rows of the given lengths.
    pub fn split(elements: &'a mut [DisplayElement], lines: &[usize]) -> Vec<SubRow<'a>> {
        let mut rest = elements;
        let mut out = Vec::with_capacity(lines.len());
        for &count in lines {
            let take = count.min(rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(take);
            out.push(SubRow {
                display_elements: head,
            });
            rest = tail;
        }
        out
    }
}

/// Rescale each line of `elements` so it spans exactly `window_width`, and
/// return the total realised height of the row including padding.
///
/// When `pad_last_sub_row` is set (the dataset's final row) the last line keeps
/// `sub_row_height` instead of being stretched.
pub fn normalize_sub_rows(
    elements: &mut [DisplayElement],
    lines: &[usize],
    window_width: f64,
    pad_last_sub_row: bool,
    sub_row_height: f64,
    padding: f64,
) -> f64 {
    let mut sub_rows = SubRow::split(elements, lines);
    let count = sub_rows.len();
    let mut scaled_total_height = 0.0;
    let mut top_accumulated = 0.0;

    for (position, sub_row) in sub_rows.iter_mut().enumerate() {
        let items = &mut *sub_row.display_elements;
        let is_last_sub_row = pad_last_sub_row && position + 1 == count;

        for element in items.iter_mut() {
            element.display_width = element.display_width * sub_row_height / element.display_height;
            element.display_height = sub_row_height;
        }

        if is_last_sub_row {
            for element in items.iter_mut() {
                element.display_top_pixel_accumulated = top_accumulated;
            }
            top_accumulated += sub_row_height + 2.0 * padding;
            scaled_total_height += sub_row_height + 2.0 * padding;
            continue;
        }

        let width_sum: f64 = items.iter().map(|e| e.display_width).sum();
        let ratio = (window_width - items.len() as f64 * 2.0 * padding) / width_sum;
        let scaled_height = sub_row_height * ratio;
        let line_height = scaled_height.round();

        let last = items.len().saturating_sub(1);
        let mut used = padding;
        for (index, element) in items.iter_mut().enumerate() {
            if index < last {
                element.display_width = (element.display_width * ratio).round();
                used += element.display_width + 2.0 * padding;
            } else {
                // Absorb the rounding residue so the line sums to the window width.
                element.display_width = window_width - used - padding;
            }
            element.display_height = line_height;
            element.display_top_pixel_accumulated = top_accumulated;
        }

        let advance = (scaled_height + 2.0 * padding).round();
        top_accumulated += advance;
        scaled_total_height += advance;
    }

    scaled_total_height
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares(count: usize, side: f64) -> Vec<DisplayElement> {
        (0..count).map(|_| DisplayElement::new(side, side)).collect()
    }

    #[test]
    fn split_follows_line_lengths() {
        let mut elements = squares(5, 10.0);
        let rows = SubRow::split(&mut elements, &[2, 3]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].display_elements.len(), 2);
        assert_eq!(rows[1].display_elements.len(), 3);
    }

    #[test]
    fn single_line_is_stretched_to_window() {
        let mut elements = squares(2, 100.0);
        // 2 items at height 100 → ratio (402 - 4) / 200 = 1.99
        let height = normalize_sub_rows(&mut elements, &[2], 402.0, false, 100.0, 1.0);
        assert_eq!(elements[0].display_width, 199.0);
        assert_eq!(elements[1].display_width, 402.0 - (1.0 + 199.0 + 2.0) - 1.0);
        assert_eq!(elements[0].display_height, 199.0);
        assert_eq!(height, (199.0_f64 + 2.0).round());
    }

    #[test]
    fn last_sub_row_of_final_row_keeps_nominal_height() {
        let mut elements = squares(3, 50.0);
        let height = normalize_sub_rows(&mut elements, &[2, 1], 300.0, true, 100.0, 1.0);

        let tail = &elements[2];
        assert_eq!(tail.display_height, 100.0);
        assert_eq!(tail.display_width, 100.0);
        assert_eq!(tail.display_top_pixel_accumulated, elements[0].display_height + 2.0);
        assert_eq!(height, elements[0].display_height + 2.0 + 102.0);
    }

    #[test]
    fn sub_row_tops_accumulate() {
        let mut elements = squares(4, 100.0);
        normalize_sub_rows(&mut elements, &[2, 2], 400.0, false, 100.0, 2.0);
        assert_eq!(elements[0].display_top_pixel_accumulated, 0.0);
        assert_eq!(elements[1].display_top_pixel_accumulated, 0.0);
        let first_line = elements[0].display_height + 4.0;
        assert_eq!(elements[2].display_top_pixel_accumulated, first_line);
        assert_eq!(elements[3].display_top_pixel_accumulated, first_line);
    }
}
