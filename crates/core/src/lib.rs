//! Minstrel core: parametric EQ bands, the band chain, spectrum analysis and
//! the response curve shown by the editor.

pub mod domain;
