//! Dosage-form keywords and product name/form splitting.
//!
//! Catalogue names put the dosage form after the product name, e.g.
//! `Аспирин ТАБЛ. 500мг №10`. Everything from the first form word on is
//! the form. The split is lexical: a word is a form word only when it
//! matches a keyword exactly or a keyword followed by `.` or `/`, so
//! unknown abbreviations stay in the name.

/// Lower-case keywords, without trailing punctuation.
const FORM_KEYWORDS: &[&str] = &[
    // Catalogue abbreviations
    "амп",
    "табл",
    "табл.п/о",
    "табл.раств",
    "табл.шип",
    "табл.рассас",
    "табл.жев",
    "жев.табл",
    "мазь",
    "супп",
    "супп.ваг",
    "гель",
    "капли",
    "фл",
    "р-р",
    "туба",
    "капс",
    "капс.рект",
    "уп",
    "паста",
    "пак",
    "пор",
    "фильтр-пакет",
    "конт",
    "крем",
    "драже",
    "ф-кап",
    "линим",
    "саше",
    "пастилки",
    // English equivalents
    "tab",
    "tabs",
    "tablet",
    "tablets",
    "caps",
    "capsule",
    "capsules",
    "amp",
    "ampoule",
    "ampoules",
    "ointment",
    "drops",
    "supp",
    "suppository",
    "suppositories",
    "gel",
    "cream",
    "solution",
    "sol",
    "syrup",
    "powder",
    "spray",
    "sachet",
    "lozenges",
    "paste",
    "vial",
];

/// Whether `word` is a dosage-form word.
pub fn is_form_word(word: &str) -> bool {
    let lower = word.to_lowercase();
    let trimmed = lower.trim_end_matches(['.', ',']);
    if trimmed.is_empty() {
        return false;
    }
    FORM_KEYWORDS.iter().any(|keyword| {
        trimmed == *keyword
            || trimmed
                .strip_prefix(keyword)
                .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('/'))
    })
}

/// Split catalogue text into `(name, form)`.
///
/// Missing parts are `"-"`.
pub fn split_name_and_form(text: &str) -> (String, String) {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return ("-".to_string(), "-".to_string());
    }

    match words.iter().position(|word| is_form_word(word)) {
        Some(0) => ("-".to_string(), words.join(" ")),
        Some(start) => (words[..start].join(" "), words[start..].join(" ")),
        None => (words.join(" "), "-".to_string()),
    }
}
