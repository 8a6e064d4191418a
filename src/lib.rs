// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
 * Automated reduction of RXTE PCA data with HEASoft: fetching observations
 * from the archive, preparing and filtering them, and extracting
 * lightcurves, spectra, power spectra and colours.
 */

pub mod config;
pub mod download;
pub mod fits;
pub mod heasoft;
pub mod layout;
pub mod pool;
pub mod prompt;
pub mod stages;
