/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Lettera, a mail delivery library.
 *
 * Lettera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Lettera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Lettera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Text encoders for RFC-compliant transport: word wrap with unwrap regions,
//! quoted-printable bodies, Q-encoded header words, extension → type lookup.

mod mimes;
mod quoted_printable;
mod rfc2047;
mod wrap;

pub use mimes::mime_from_extension;
pub use quoted_printable::prep_quoted_printable;
pub use rfc2047::prep_q_encoding;
pub use wrap::{unwrap_specials, word_wrap};
