/// Three-letter asset codes for every playable character, as they appear in
/// pak asset paths (`Chara/SOL/...`), paired with display names.
pub const CHARACTERS: &[(&str, &str)] = &[
    ("ASK", "Asuka R#"),
    ("SOL", "Sol Badguy"),
    ("KYK", "Ky Kiske"),
    ("MAY", "May"),
    ("AXL", "Axl Low"),
    ("CHP", "Chipp Zanuff"),
    ("POT", "Potemkin"),
    ("FAU", "Faust"),
    ("MLL", "Millia Rage"),
    ("ZAT", "Zato-1"),
    ("RAM", "Ramlethal"),
    ("LEO", "Leo Whitefang"),
    ("NAG", "Nagoriyuki"),
    ("GIO", "Giovanna"),
    ("ANJ", "Anji Mito"),
    ("INO", "I-No"),
    ("GLD", "Goldlewis"),
    ("JKO", "Jack-O"),
    ("COS", "Happy Chaos"),
    ("BKN", "Baiken"),
    ("TST", "Testament"),
    ("SIN", "Sin Kiske"),
    ("BGT", "Bridget"),
    ("ELP", "Elphelt"),
];

pub fn is_known_code(code: &str) -> bool {
    CHARACTERS.iter().any(|(id, _)| *id == code)
}

pub fn display_name(code: &str) -> Option<&'static str> {
    CHARACTERS
        .iter()
        .find(|(id, _)| *id == code)
        .map(|(_, name)| *name)
}
