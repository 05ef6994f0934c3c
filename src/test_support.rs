//! Shared fixtures for unit tests.

use serde_json::{json, Value};

/// Two companies over three periods, two banks, plus one payables row
/// (`CXP`) carrying amounts that must never surface anywhere.
///
/// Bank X movements in 2024-01 are `50` (Acme) and `-20` (Beta).
pub fn sample_snapshot() -> Value {
    json!({
        "columns": ["Empresa", "Cuenta", "Fecha", "Banco", "Saldo Inicial", "Saldo Libros", "Movimientos"],
        "data": [
            ["Acme", "Cta 001", "2024-01-31", "Banco X", 600.0, 650.0, 50.0],
            ["Acme", "Cta 002", "2024-01-31", "Banco Y", 400.0, 450.0, 50.0],
            ["Beta", "Cta 101", "2024-01-31", "Banco X", 200.0, 180.0, -20.0],
            ["Acme", "Cta 001", "2024-02-29", "Banco X", 650.0, 700.0, 50.0],
            ["Acme", "Cta 002", "2024-02-29", "Banco Y", 450.0, 430.0, -20.0],
            ["Acme", "CXP proveedores", "2024-02-15", "Banco X", 999999.0, 999999.0, 999999.0],
            ["Beta", "Cta 101", "2024-02-29", "Banco X", 180.0, 150.0, -30.0],
            ["Acme", "Cta 001", "2024-03-31", "Banco X", 700.0, 690.0, -10.0],
            ["Acme", "Cta 002", "2024-03-31", "Banco Y", 430.0, 400.0, -30.0],
            ["Beta", "Cta 102", "2024-03-31", "Banco Y", 150.0, 170.0, 20.0]
        ]
    })
}
