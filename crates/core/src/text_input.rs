/// Editable text buffer with a char-indexed cursor.
///
/// Single-line buffers ignore [`TextInput::newline`]; multi-line buffers
/// track the cursor across `\n` separated lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextInput {
    chars: Vec<char>,
    cursor: usize,
    multiline: bool,
    placeholder: String,
}

impl TextInput {
    #[must_use]
    pub fn single_line() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn multiline() -> Self {
        Self {
            multiline: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: &str) -> Self {
        self.set_value(value);
        self
    }

    #[must_use]
    pub fn value(&self) -> String {
        self.chars.iter().collect()
    }

    #[must_use]
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Replaces the contents and parks the cursor at the end.
    pub fn set_value(&mut self, value: &str) {
        self.chars = value
            .chars()
            .filter(|ch| self.multiline || *ch != '\n')
            .collect();
        self.cursor = self.chars.len();
    }

    pub fn reset(&mut self) {
        self.chars.clear();
        self.cursor = 0;
    }

    pub fn insert(&mut self, ch: char) {
        if ch == '\n' && !self.multiline {
            return;
        }
        self.chars.insert(self.cursor, ch);
        self.cursor += 1;
    }

    pub fn newline(&mut self) {
        self.insert('\n');
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        self.chars.remove(self.cursor);
    }

    pub fn delete(&mut self) {
        if self.cursor < self.chars.len() {
            self.chars.remove(self.cursor);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.chars.len());
    }

    /// Start of the current line.
    pub fn move_home(&mut self) {
        self.cursor = self.line_start(self.cursor);
    }

    /// End of the current line.
    pub fn move_end(&mut self) {
        self.cursor = self.line_end(self.cursor);
    }

    pub fn move_up(&mut self) {
        let start = self.line_start(self.cursor);
        if start == 0 {
            self.cursor = 0;
            return;
        }
        let column = self.cursor - start;
        let previous_start = self.line_start(start - 1);
        let previous_len = start - 1 - previous_start;
        self.cursor = previous_start + column.min(previous_len);
    }

    pub fn move_down(&mut self) {
        let end = self.line_end(self.cursor);
        if end == self.chars.len() {
            self.cursor = end;
            return;
        }
        let column = self.cursor - self.line_start(self.cursor);
        let next_start = end + 1;
        let next_len = self.line_end(next_start) - next_start;
        self.cursor = next_start + column.min(next_len);
    }

    /// Zero-based `(line, column)` of the cursor, counted in chars.
    #[must_use]
    pub fn cursor_position(&self) -> (usize, usize) {
        let line = self.chars[..self.cursor]
            .iter()
            .filter(|ch| **ch == '\n')
            .count();
        (line, self.cursor - self.line_start(self.cursor))
    }

    fn line_start(&self, position: usize) -> usize {
        self.chars[..position]
            .iter()
            .rposition(|ch| *ch == '\n')
            .map_or(0, |index| index + 1)
    }

    fn line_end(&self, position: usize) -> usize {
        self.chars[position..]
            .iter()
            .position(|ch| *ch == '\n')
            .map_or(self.chars.len(), |index| position + index)
    }
}

#[cfg(test)]
mod tests {
    use super::TextInput;

    #[test]
    fn edits_at_the_cursor_with_multibyte_chars() {
        let mut input = TextInput::single_line().with_value("héllo");
        input.move_left();
        input.move_left();
        input.insert('x');
        assert_eq!(input.value(), "hélxlo");

        input.backspace();
        input.move_home();
        input.delete();
        assert_eq!(input.value(), "éllo");
        assert_eq!(input.cursor(), 0);
    }

    #[test]
    fn single_line_rejects_newlines() {
        let mut input = TextInput::single_line().with_value("a\nb");
        input.newline();
        assert_eq!(input.value(), "ab");
    }

    #[test]
    fn multiline_cursor_moves_between_lines() {
        let mut input = TextInput::multiline().with_value("select *\nfrom t\nwhere id = 1");
        assert_eq!(input.cursor_position(), (2, 12));

        input.move_up();
        assert_eq!(input.cursor_position(), (1, 6));
        input.move_up();
        assert_eq!(input.cursor_position(), (0, 6));
        input.move_up();
        assert_eq!(input.cursor_position(), (0, 0));

        input.move_end();
        input.move_down();
        assert_eq!(input.cursor_position(), (1, 6));
        input.move_down();
        input.move_down();
        assert_eq!(input.cursor(), input.value().chars().count());
    }

    #[test]
    fn boundaries_are_no_ops() {
        let mut input = TextInput::multiline().with_placeholder("type here");
        input.backspace();
        input.delete();
        input.move_left();
        input.move_right();

        assert!(input.is_empty());
        assert_eq!(input.placeholder(), "type here");
        assert_eq!(input.cursor_position(), (0, 0));
    }
}
