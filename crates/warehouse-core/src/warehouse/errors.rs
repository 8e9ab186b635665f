/// Returned for backend failures that match no known message.
pub const GENERIC_DISCOVERY_MESSAGE: &str = "Could not get columns";

/// Backend message fragment to user-facing message, longest fragment first so
/// the most specific entry wins.
pub const BACKEND_ERROR_MESSAGES: &[(&str, &str)] = &[
    (
        "Cannot extract table structure from JSONEachRow format file, because there are no files with provided path in S3 or all files are empty",
        "The provided file doesn't exist in the bucket",
    ),
    (
        "Cannot extract table structure from Parquet format file, because there are no files with provided path in S3 or all files are empty",
        "The provided file doesn't exist in the bucket",
    ),
    (
        "Cannot extract table structure from CSV format file, because there are no files with provided path in S3 or all files are empty",
        "The provided file doesn't exist in the bucket",
    ),
    (
        "S3 exception: `NoSuchBucket`, message: 'The specified bucket does not exist.'",
        "The provided bucket doesn't exist",
    ),
    (
        "Either the file is corrupted or this is not a parquet file",
        "The provided file is not in Parquet format",
    ),
    (
        "The AWS Access Key Id you provided does not exist",
        "The Access Key you provided does not exist",
    ),
    (
        "Bucket or key name are invalid in S3 URI",
        "The provided file or bucket doesn't exist",
    ),
    (
        "Rows have different amount of values",
        "The provided file has rows with different amount of values",
    ),
    (
        "Access Denied: while reading key:",
        "Access was denied when reading the provided file",
    ),
    (
        "Could not list objects in bucket",
        "Access was denied to the provided bucket",
    ),
    (
        "The specified key does not exist",
        "The provided file doesn't exist in the bucket",
    ),
    ("file is empty", "The provided file contains no data"),
];

/// User-facing message for a backend error, if one of the known fragments
/// occurs in it.
pub fn translate_backend_error(message: &str) -> Option<&'static str> {
    BACKEND_ERROR_MESSAGES
        .iter()
        .find(|(fragment, _)| message.contains(fragment))
        .map(|(_, friendly)| *friendly)
}
