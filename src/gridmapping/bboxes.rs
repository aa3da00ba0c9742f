//! Bounding box computations on coordinate images

use ndarray::{ArrayView2, ArrayView3, Axis};

/// Compute the inclusive pixel boxes `[i_min, j_min, i_max, j_max]` of the
/// pixels whose coordinates fall into each of `xy_bboxes`.
///
/// Boxes are enlarged by `xy_border` in coordinate units before the search
/// and the results by `ij_border` pixels, clamped to the image. Boxes for
/// which no pixel was found are `[-1, -1, -1, -1]`.
pub fn compute_ij_bboxes(
    x_image: ArrayView2<f64>,
    y_image: ArrayView2<f64>,
    xy_bboxes: &[[f64; 4]],
    xy_border: f64,
    ij_border: i64,
) -> Vec<[i64; 4]> {
    let (h, w) = x_image.dim();
    xy_bboxes
        .iter()
        .map(|xy_bbox| {
            let x_min = xy_bbox[0] - xy_border;
            let y_min = xy_bbox[1] - xy_border;
            let x_max = xy_bbox[2] + xy_border;
            let y_max = xy_bbox[3] + xy_border;
            let mut ij_bbox = [-1i64; 4];
            for ((j, i), &x) in x_image.indexed_iter() {
                if !(x_min <= x && x <= x_max) {
                    continue;
                }
                let y = y_image[[j, i]];
                if !(y_min <= y && y <= y_max) {
                    continue;
                }
                let (i, j) = (i as i64, j as i64);
                if ij_bbox[0] < 0 {
                    ij_bbox = [i, j, i, j];
                } else {
                    ij_bbox[0] = ij_bbox[0].min(i);
                    ij_bbox[1] = ij_bbox[1].min(j);
                    ij_bbox[2] = ij_bbox[2].max(i);
                    ij_bbox[3] = ij_bbox[3].max(j);
                }
            }
            if ij_border != 0 && ij_bbox[0] != -1 {
                ij_bbox[0] = (ij_bbox[0] - ij_border).max(0);
                ij_bbox[1] = (ij_bbox[1] - ij_border).max(0);
                ij_bbox[2] = (ij_bbox[2] + ij_border).min(w as i64 - 1);
                ij_bbox[3] = (ij_bbox[3] + ij_border).min(h as i64 - 1);
            }
            ij_bbox
        })
        .collect()
}

/// Compute `(x_min, y_min, x_max, y_max)` of coordinates given with shape
/// `(2, height, width)`, ignoring NaNs
pub fn compute_xy_bbox(xy_coords: ArrayView3<f64>) -> Option<(f64, f64, f64, f64)> {
    let range = |index: usize| {
        xy_coords
            .index_axis(Axis(0), index)
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    };
    if xy_coords.len_of(Axis(0)) != 2 {
        return None;
    }
    let (x_min, x_max) = range(0)?;
    let (y_min, y_max) = range(1)?;
    Some((x_min, y_min, x_max, y_max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Array3};

    fn images() -> (Array2<f64>, Array2<f64>) {
        let lon = Array1::linspace(10.0, 20.0, 11);
        let lat = Array1::linspace(50.0, 60.0, 11);
        let x = Array2::from_shape_fn((11, 11), |(_, i)| lon[i]);
        let y = Array2::from_shape_fn((11, 11), |(j, _)| lat[j]);
        (x, y)
    }

    #[test]
    fn test_all_included() {
        let (x, y) = images();
        let result = compute_ij_bboxes(x.view(), y.view(), &[[10.0, 50.0, 20.0, 60.0]], 0.0, 0);
        assert_eq!(result, vec![[0, 0, 10, 10]]);
    }

    #[test]
    fn test_tiles() {
        let (x, y) = images();
        let bboxes = [
            [10.0, 50.0, 15.0, 55.0],
            [15.0, 50.0, 20.0, 55.0],
            [10.0, 55.0, 15.0, 60.0],
            [15.0, 55.0, 20.0, 60.0],
        ];
        let result = compute_ij_bboxes(x.view(), y.view(), &bboxes, 0.0, 0);
        assert_eq!(
            result,
            vec![[0, 0, 5, 5], [5, 0, 10, 5], [0, 5, 5, 10], [5, 5, 10, 10]]
        );
    }

    #[test]
    fn test_none_found() {
        let (x, y) = images();
        let bboxes = [
            [21.0, 61.0, 26.0, 66.0],
            [26.0, 61.0, 31.0, 66.0],
        ];
        let result = compute_ij_bboxes(x.view(), y.view(), &bboxes, 0.0, 0);
        assert_eq!(result, vec![[-1, -1, -1, -1], [-1, -1, -1, -1]]);
    }

    #[test]
    fn test_with_border() {
        let (x, y) = images();
        let bbox = [[12.4, 51.6, 12.6, 51.7]];
        let cases = [
            (0.0, 0, [-1, -1, -1, -1]),
            (0.5, 0, [2, 2, 3, 2]),
            (1.0, 0, [2, 1, 3, 2]),
            (2.0, 0, [1, 0, 4, 3]),
            (2.0, 2, [0, 0, 6, 5]),
        ];
        for (xy_border, ij_border, expected) in cases {
            let result = compute_ij_bboxes(x.view(), y.view(), &bbox, xy_border, ij_border);
            assert_eq!(result, vec![expected], "xy_border={xy_border} ij_border={ij_border}");
        }
    }

    #[test]
    fn test_compute_xy_bbox() {
        let xy = Array3::from_shape_fn((2, 4, 5), |(c, j, i)| {
            let base = if c == 0 { 10.0 } else { 50.0 };
            base + (i + j) as f64
        });
        assert_eq!(compute_xy_bbox(xy.view()), Some((10.0, 50.0, 17.0, 57.0)));
    }

    #[test]
    fn test_compute_xy_bbox_many_nans() {
        let mut xy = Array3::from_elem((2, 100, 200), f64::NAN);
        xy[[0, 17, 42]] = 73.0;
        xy[[1, 80, 3]] = 34.0;
        assert_eq!(compute_xy_bbox(xy.view()), Some((73.0, 34.0, 73.0, 34.0)));

        let all_nan = Array3::from_elem((2, 3, 3), f64::NAN);
        assert_eq!(compute_xy_bbox(all_nan.view()), None);
    }
}
