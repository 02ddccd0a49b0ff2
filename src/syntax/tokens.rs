#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Floating-point number
    ///
    /// # Examples
    /// ```text
    /// 3.14
    /// 0.5
    /// ```
    Float(f64),

    /// Integer
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 6
    /// ```
    Integer(i64),

    /// String literal enclosed in single or double quotes
    ///
    /// # Examples
    /// ```text
    /// "hello"
    /// 'item #1'
    /// ```
    String(String),

    /// Boolean values
    Boolean(bool),

    /// Null value
    Null,

    /// Bound query parameter (`$name`)
    ///
    /// # Examples
    /// ```text
    /// $mask
    /// $min_price
    /// ```
    Param(String),

    // Identifiers and References
    /// Field name, enum type or member, method name or stage keyword
    ///
    /// Must start with letter or underscore, followed by letters, digits, or underscores.
    Identifier(String),

    /// Current document reference
    ///
    /// # Examples
    /// ```text
    /// $
    /// $.field
    /// $[field]
    /// ```
    Dollar,

    /// Current array element inside `.any()`, `.filter()`, `.map()` and
    /// array transforms
    At,

    // Statement operators
    /// Filter statement (`?`)
    Question,

    /// Transform statement (`~`)
    Tilde,

    /// Output statement (`!`)
    Exclamation,

    /// Assignment inside transforms (`:=`)
    ColonEqual,

    /// Statement separator (`|>`)
    Pipe,

    // Comparison
    /// Equality operator
    EqEq,

    /// Inequality operator
    NotEq,

    /// Less than
    Lt,

    /// Greater than
    Gt,

    /// Less than or equal
    LtEq,

    /// Greater than or equal
    GtEq,

    // Arithmetic
    /// Addition or string concatenation
    Plus,

    /// Subtraction or negation
    Minus,

    /// Multiplication
    Star,

    /// Division
    Slash,

    /// Modulo
    Percent,

    // Bitwise
    /// Bitwise AND (`&`)
    Ampersand,

    /// Bitwise OR (`|`)
    Bar,

    /// Null-coalescing (`??`)
    QuestionQuestion,

    // Logical
    /// Logical AND (word, not symbol)
    And,

    /// Logical OR (word, not symbol)
    Or,

    /// Logical negation (word, not symbol)
    Not,

    // Delimiters
    /// Left bracket for accessors and array literals
    LBracket,

    /// Right bracket
    RBracket,

    /// Left parenthesis for grouping or calls
    LParen,

    /// Right parenthesis
    RParen,

    /// Left brace for object literals
    LBrace,

    /// Right brace
    RBrace,

    /// Dot for member access and method calls
    Dot,

    /// Comma for separating arguments or elements
    Comma,

    /// Colon for object literal key-value pairs
    Colon,

    /// End of input
    Eof,
}
