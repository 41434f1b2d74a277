//! Wire responses for the line analysis protocol.
//!
//! Clients send one UTF-8 line terminated by `\n`. The server answers with
//! either a three-line summary or a single generic error line, then closes
//! the connection:
//!
//! ```text
//! Request:  banana\n
//! Response: La cadena termina en 'a'.\n
//!           Aparece 3 veces.\n
//!           ¿Es el número 3 primo?: Si\n
//!
//! Failure:  Error interno procesando la solicitud\n
//! ```

use crate::analysis::AnalysisResult;

/// Response builder
pub struct Response;

impl Response {
    /// Success response summarizing an analysis
    pub fn analysis(result: &AnalysisResult) -> String {
        format!(
            "La cadena termina en '{}'.\nAparece {} veces.\n¿Es el número {} primo?: {}\n",
            result.last_char,
            result.count,
            result.count,
            Self::yes_no(result.is_count_prime)
        )
    }

    /// Generic failure line; never carries error details
    pub fn internal_error() -> &'static [u8] {
        b"Error interno procesando la solicitud\n"
    }

    fn yes_no(value: bool) -> &'static str {
        if value {
            "Si"
        } else {
            "No"
        }
    }
}
