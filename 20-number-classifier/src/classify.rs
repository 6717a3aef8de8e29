//! Pure classification of a received number into its three response lines.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divisibility {
    DivisibleByThree,
    NotDivisibleByThree,
}

/// Whether the number was the first one classified on its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordinal {
    First,
    Subsequent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub number: i32,
    pub parity: Parity,
    pub divisibility: Divisibility,
    pub ordinal: Ordinal,
}

/// Classifies `number` and returns the connection's next `is_first` flag,
/// which is always `false`.
pub fn classify(number: i32, is_first: bool) -> (Classification, bool) {
    let parity = if number % 2 == 0 {
        Parity::Even
    } else {
        Parity::Odd
    };
    let divisibility = if number % 3 == 0 {
        Divisibility::DivisibleByThree
    } else {
        Divisibility::NotDivisibleByThree
    };
    let ordinal = if is_first {
        Ordinal::First
    } else {
        Ordinal::Subsequent
    };

    let classification = Classification {
        number,
        parity,
        divisibility,
        ordinal,
    };
    (classification, false)
}

impl Classification {
    /// The three lines of the response burst, in wire order.
    ///
    /// Clients find the end of a burst by matching on the wording of the third
    /// line, so it must keep containing `first number` / `not the first`.
    pub fn lines(&self) -> [String; 3] {
        [
            format!("The number {} is {}.\n", self.number, self.parity),
            format!("The number {} is {}.\n", self.number, self.divisibility),
            // The trailing blank line separates consecutive bursts on a console.
            format!("This is {} sent by this client.\n\n", self.ordinal),
        ]
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Even => f.write_str("even"),
            Parity::Odd => f.write_str("odd"),
        }
    }
}

impl fmt::Display for Divisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Divisibility::DivisibleByThree => f.write_str("divisible by 3"),
            Divisibility::NotDivisibleByThree => f.write_str("not divisible by 3"),
        }
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ordinal::First => f.write_str("the first number"),
            Ordinal::Subsequent => f.write_str("not the first number"),
        }
    }
}
