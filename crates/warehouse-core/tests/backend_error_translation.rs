use warehouse_core::warehouse::errors::{translate_backend_error, BACKEND_ERROR_MESSAGES, GENERIC_DISCOVERY_MESSAGE};

#[test]
fn fragments_are_checked_longest_first() {
    for pair in BACKEND_ERROR_MESSAGES.windows(2) {
        assert!(pair[0].0.len() >= pair[1].0.len(), "{:?} before {:?}", pair[0].0, pair[1].0);
    }
}

#[test]
fn most_specific_fragment_wins() {
    let message = "Code: 499. DB::Exception: Access Denied: while reading key: exports/a.csv. \
                   The specified key does not exist.";
    assert_eq!(
        translate_backend_error(message),
        Some("Access was denied when reading the provided file")
    );
}

#[test]
fn common_misconfigurations_have_short_messages() {
    let cases = [
        (
            "S3 exception: `NoSuchBucket`, message: 'The specified bucket does not exist.'",
            "The provided bucket doesn't exist",
        ),
        (
            "Code: 36. DB::Exception: Bucket or key name are invalid in S3 URI.",
            "The provided file or bucket doesn't exist",
        ),
        (
            "Either the file is corrupted or this is not a parquet file.",
            "The provided file is not in Parquet format",
        ),
        (
            "Code: 117. DB::Exception: Rows have different amount of values",
            "The provided file has rows with different amount of values",
        ),
        ("The input file is empty", "The provided file contains no data"),
    ];
    for (backend, friendly) in cases {
        assert_eq!(translate_backend_error(backend), Some(friendly), "{backend}");
    }
}

#[test]
fn unmatched_messages_have_no_translation() {
    assert_eq!(translate_backend_error("Memory limit (total) exceeded"), None);
    assert_eq!(GENERIC_DISCOVERY_MESSAGE, "Could not get columns");
}
