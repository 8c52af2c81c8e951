/*!
 * Composable record predicates
 *
 * Filter steps are built from boxed single-record tests combined with
 * AND/OR/NOT. Applying a step keeps the records whose test passes, in
 * their original order.
 */

/// Boxed test over one record
pub type Test<'a, T> = Box<dyn Fn(&T) -> bool + Send + Sync + 'a>;

/// Passes when every test passes (vacuously true)
pub fn all_of<'a, T: 'a>(tests: Vec<Test<'a, T>>) -> Test<'a, T> {
    Box::new(move |record| tests.iter().all(|t| t(record)))
}

/// Passes when some test passes (false when empty)
pub fn any_of<'a, T: 'a>(tests: Vec<Test<'a, T>>) -> Test<'a, T> {
    Box::new(move |record| tests.iter().any(|t| t(record)))
}

/// Inverts a test
pub fn not<'a, T: 'a>(test: Test<'a, T>) -> Test<'a, T> {
    Box::new(move |record| !test(record))
}

/// Keep the records of `subset` that pass `test`
pub fn keep<'r, T, F>(subset: Vec<&'r T>, test: F) -> Vec<&'r T>
where
    T: Sync,
    F: Fn(&T) -> bool + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        subset.into_par_iter().filter(|r| test(r)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        subset.into_iter().filter(|r| test(r)).collect()
    }
}
