// Property tests for ownership and the calling convention.
//
// Random sequences of reference operations must leave the heap exactly as
// they found it, and calls must not depend on how the arguments were split
// across partial applications.

use pure_core::{Exception, Interpreter, MatrixKind, Outcome, RuntimeConfig, TermRef};
use proptest::prelude::*;

fn interp() -> Interpreter {
    Interpreter::with_config(RuntimeConfig::default())
}

fn sum(interp: &mut Interpreter, args: &[TermRef], _env: &[TermRef]) -> Result<Outcome, Exception> {
    let s = args
        .iter()
        .fold(0i32, |acc, &a| acc.wrapping_add(interp.int_val(a).unwrap_or(0)));
    Ok(Outcome::Value(interp.int(s)))
}

proptest! {
    #[test]
    fn balanced_new_free_restores_heap(refs in prop::collection::vec(1u32..5, 1..50)) {
        let mut interp = interp();
        let before = interp.heap_stats().live;
        let terms: Vec<TermRef> = (0..refs.len()).map(|i| interp.int(i as i32)).collect();
        for (&t, &n) in terms.iter().zip(&refs) {
            for _ in 0..n {
                interp.new(t);
            }
        }
        // Release in reverse order, one reference at a time
        for (&t, &n) in terms.iter().zip(&refs).rev() {
            for k in 0..n {
                prop_assert!(interp.is_live(t));
                prop_assert_eq!(interp.refc(t), n - k);
                interp.free(t);
            }
            prop_assert!(!interp.is_live(t));
        }
        prop_assert_eq!(interp.heap_stats().live, before);
        prop_assert_eq!(interp.heap_stats().floating, 0);
    }

    #[test]
    fn nested_lists_release_completely(depth in 1usize..200, width in 1usize..5) {
        let mut interp = interp();
        let warm = interp.nil();
        let warm = interp.cons(warm, warm);
        interp.freenew(warm);
        let before = interp.heap_stats().live;

        let mut x = interp.nil();
        for d in 0..depth {
            let elems: Vec<TermRef> = (0..width).map(|i| interp.int((d * width + i) as i32)).collect();
            let mut row = elems;
            row.push(x);
            x = interp.list(&row);
        }
        interp.new(x);
        interp.free(x);
        prop_assert_eq!(interp.heap_stats().live, before);
    }

    #[test]
    fn split_application_equals_full_call(
        xs in prop::collection::vec(-1000i32..1000, 1..8),
        split in 0usize..8,
    ) {
        let mut interp = interp();
        let f = interp.closure(sum, xs.len() as u32, &[]);
        interp.new(f);

        let args: Vec<TermRef> = xs.iter().map(|&n| interp.int(n)).collect();
        let full = interp.appl(f, &args).unwrap();
        let full = interp.int_val(full);

        let k = split.min(xs.len());
        let front: Vec<TermRef> = xs[..k].iter().map(|&n| interp.int(n)).collect();
        let g = interp.appl(f, &front).unwrap();
        let back: Vec<TermRef> = xs[k..].iter().map(|&n| interp.int(n)).collect();
        let r = interp.appl(g, &back).unwrap();

        prop_assert_eq!(interp.int_val(r), full);
        prop_assert_eq!(full, Some(xs.iter().sum::<i32>()));
    }

    #[test]
    fn transpose_twice_is_identity(rows in 0usize..6, cols in 0usize..6) {
        let mut interp = interp();
        let data: Vec<i32> = (0..(rows * cols) as i32).collect();
        let x = interp.int_matrix(rows, cols, &data).unwrap();
        let t = interp.matrix_transpose(x).unwrap();
        prop_assert_eq!(interp.matrix_dim(t), Ok((cols, rows)));
        let tt = interp.matrix_transpose(t).unwrap();
        prop_assert_eq!(interp.matrix_dim(tt), Ok((rows, cols)));
        prop_assert_eq!(interp.render(tt), interp.render(x));
        prop_assert_eq!(interp.matrix_kind(tt), Some(MatrixKind::Int));
    }

    #[test]
    fn slices_stay_within_bounds(
        i1 in -3i64..8, j1 in -3i64..8, i2 in -3i64..8, j2 in -3i64..8,
    ) {
        let mut interp = interp();
        let data: Vec<f64> = (0..20i32).map(f64::from).collect();
        let x = interp.real_matrix(4, 5, &data).unwrap();
        let s = interp.matrix_slice(x, i1, j1, i2, j2).unwrap();
        let (r, c) = interp.matrix_dim(s).unwrap();
        prop_assert!(r <= 4 && c <= 5);
        if r > 0 && c > 0 {
            // The first element is the clamped top-left corner
            let top = i1.max(0) as usize;
            let left = j1.max(0) as usize;
            let e = interp.matrix_elem_at(s, 0).unwrap();
            prop_assert_eq!(interp.double_val(e), Some((top * 5 + left) as f64));
        }
    }
}
