//! Random ID generation with a safe alphabet.

/// Alphabet excluding vowels and ambiguous characters (I, O, U, A, E).
const ID_ALPHABET: [char; 31] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'B', 'C', 'D', 'F', 'G', 'H', 'J', 'K', 'L',
    'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'V', 'W', 'X', 'Y', 'Z',
];

/// Length of the ids assigned to subreddits, posts and comments.
pub const ENTITY_ID_LENGTH: usize = 32;

/// Generates a random ID of the specified length using a safe alphabet.
///
/// The alphabet contains neither `#` nor `.`, so generated ids never collide with the key
/// delimiters of the table.
pub fn generate_id(len: usize) -> String {
    nanoid::format(nanoid::rngs::default, &ID_ALPHABET, len)
}

/// Generates an id for a new entity.
pub fn generate_entity_id() -> String {
    generate_id(ENTITY_ID_LENGTH)
}
