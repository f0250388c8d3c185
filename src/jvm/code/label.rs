use std::fmt;

/// Opaque label
///
/// Labels only mark positions; they get meaning from the instruction list
/// that places them.
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Label(usize);

impl Label {
    /// Label for the start of a method
    pub const START: Label = Label(0);

    /// Get the next fresh label
    pub fn next(&self) -> Label {
        Label(self.0 + 1)
    }
}

/// Generates new labels
///
/// Cloning does not split the generator source - the cloned generator will
/// produce the same sequence of labels as the original.
#[derive(Clone)]
pub struct LabelGenerator(Label);

impl LabelGenerator {
    pub fn new() -> LabelGenerator {
        LabelGenerator(Label::START)
    }

    pub fn starting_at(start: Label) -> LabelGenerator {
        LabelGenerator(start)
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> Label {
        let to_return = self.0;
        self.0 = self.0.next();
        to_return
    }
}

impl Default for LabelGenerator {
    fn default() -> LabelGenerator {
        LabelGenerator::new()
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}
