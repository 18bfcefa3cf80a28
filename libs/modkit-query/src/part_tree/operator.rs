use std::fmt;

/// Comparison operator of a method-name part.
///
/// Declaration order matters: when several keywords match a part with
/// property paths of equal length, the operator declared first wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Between,
    IsNotNull,
    IsNull,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Before,
    After,
    NotLike,
    Like,
    StartingWith,
    EndingWith,
    IsNotEmpty,
    IsEmpty,
    NotContaining,
    Containing,
    NotIn,
    In,
    /// Vector similarity: consumes a vector and a score threshold.
    Near,
    /// Vector similarity: consumes a vector and a score range.
    Within,
    Regex,
    Exists,
    True,
    False,
    NegatingSimpleProperty,
    SimpleProperty,
}

impl Operator {
    pub const ALL: [Operator; 27] = [
        Operator::Between,
        Operator::IsNotNull,
        Operator::IsNull,
        Operator::LessThan,
        Operator::LessThanEqual,
        Operator::GreaterThan,
        Operator::GreaterThanEqual,
        Operator::Before,
        Operator::After,
        Operator::NotLike,
        Operator::Like,
        Operator::StartingWith,
        Operator::EndingWith,
        Operator::IsNotEmpty,
        Operator::IsEmpty,
        Operator::NotContaining,
        Operator::Containing,
        Operator::NotIn,
        Operator::In,
        Operator::Near,
        Operator::Within,
        Operator::Regex,
        Operator::Exists,
        Operator::True,
        Operator::False,
        Operator::NegatingSimpleProperty,
        Operator::SimpleProperty,
    ];

    /// Method-name suffixes selecting this operator.
    #[must_use]
    pub const fn keywords(self) -> &'static [&'static str] {
        match self {
            Operator::Between => &["IsBetween", "Between"],
            Operator::IsNotNull => &["IsNotNull", "NotNull"],
            Operator::IsNull => &["IsNull", "Null"],
            Operator::LessThan => &["IsLessThan", "LessThan"],
            Operator::LessThanEqual => &["IsLessThanEqual", "LessThanEqual"],
            Operator::GreaterThan => &["IsGreaterThan", "GreaterThan"],
            Operator::GreaterThanEqual => &["IsGreaterThanEqual", "GreaterThanEqual"],
            Operator::Before => &["IsBefore", "Before"],
            Operator::After => &["IsAfter", "After"],
            Operator::NotLike => &["IsNotLike", "NotLike"],
            Operator::Like => &["IsLike", "Like"],
            Operator::StartingWith => &["IsStartingWith", "StartingWith", "StartsWith"],
            Operator::EndingWith => &["IsEndingWith", "EndingWith", "EndsWith"],
            Operator::IsNotEmpty => &["IsNotEmpty", "NotEmpty"],
            Operator::IsEmpty => &["IsEmpty", "Empty"],
            Operator::NotContaining => &["IsNotContaining", "NotContaining", "NotContains"],
            Operator::Containing => &["IsContaining", "Containing", "Contains"],
            Operator::NotIn => &["IsNotIn", "NotIn"],
            Operator::In => &["IsIn", "In"],
            Operator::Near => &["IsNear", "Near"],
            Operator::Within => &["IsWithin", "Within"],
            Operator::Regex => &["MatchesRegex", "Matches", "Regex"],
            Operator::Exists => &["Exists"],
            Operator::True => &["IsTrue", "True"],
            Operator::False => &["IsFalse", "False"],
            Operator::NegatingSimpleProperty => &["IsNot", "Not"],
            Operator::SimpleProperty => &["Is", "Equals"],
        }
    }

    /// Number of method arguments consumed.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Operator::Between | Operator::Near | Operator::Within => 2,
            Operator::IsNotNull
            | Operator::IsNull
            | Operator::IsNotEmpty
            | Operator::IsEmpty
            | Operator::Exists
            | Operator::True
            | Operator::False => 0,
            _ => 1,
        }
    }

    /// Whether the operator compares textually and can honour ignore-case.
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(
            self,
            Operator::SimpleProperty
                | Operator::NegatingSimpleProperty
                | Operator::Like
                | Operator::NotLike
                | Operator::StartingWith
                | Operator::EndingWith
                | Operator::Containing
                | Operator::NotContaining
                | Operator::In
                | Operator::NotIn
        )
    }

    /// Operators consuming a vector argument.
    #[must_use]
    pub const fn is_vector_search(self) -> bool {
        matches!(self, Operator::Near | Operator::Within)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
