pub trait NormalizeString {
    /// Normalizes line endings by stripping `\r` and guarantees a trailing `\n`.
    fn normalize(&self) -> String;

    /// Canonical form of a header label: lowercase, with whitespace, `_` and
    /// `-` removed. `"Dome Flat"`, `"dome_flat"` and `"DOMEFLAT"` all map to
    /// `"domeflat"`.
    fn normalize_label(&self) -> String;
}

impl NormalizeString for str {
    fn normalize(&self) -> String {
        let mut out = String::with_capacity(self.len() + 1);
        let mut chars = self.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\r' {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            } else {
                out.push(c);
            }
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    fn normalize_label(&self) -> String {
        self.chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect()
    }
}

impl NormalizeString for String {
    fn normalize(&self) -> String {
        self.as_str().normalize()
    }

    fn normalize_label(&self) -> String {
        self.as_str().normalize_label()
    }
}
