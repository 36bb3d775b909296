//! Downlink Resource Grid
//!
//! Owns the per-port complex RE buffer for one slot and maps modulated,
//! spatially precoded data symbols onto it according to 3GPP TS 38.211.

use crate::precoder::ChannelPrecoder;
use crate::precoding::PrecodingConfiguration;
use crate::re_buffer::{ReBuffer, ReBufferReader, ReBufferView};
use crate::re_pattern::RePatternList;
use crate::PhyError;
use common::{divide_ceil, BoundedBitset, MAX_NSYMB_PER_SLOT, MAX_RB, NRE};
use ndarray::{s, Array3, ArrayView1};
use num_complex::Complex32;
use num_traits::Zero;
use tracing::debug;

/// Lazily-pulled source of modulation symbols for streamed mapping.
pub trait SymbolBuffer {
    /// Maximum number of symbols a single [`pop_symbols`](Self::pop_symbols)
    /// call may request.
    fn max_block_size(&self) -> usize;

    /// Produce the next `count` symbols.
    ///
    /// Requesting more symbols than the source can still produce is a
    /// contract violation.
    fn pop_symbols(&mut self, count: usize) -> &[Complex32];
}

/// RE storage shared by the writer and reader facades.
///
/// The grid is one flat buffer addressed as (port, symbol, subcarrier), so
/// the subcarriers of one symbol stay contiguous for the OFDM stage.
struct GridStorage {
    data: Array3<Complex32>,
    empty: Vec<bool>,
    nof_ports: usize,
    nof_symbols: usize,
    nof_subc: usize,
}

impl GridStorage {
    /// Write `symbols` to the set bits of `mask` offset by `k_init`, in
    /// ascending subcarrier order, returning the unconsumed tail.
    fn put_mask<'s>(
        &mut self,
        port: usize,
        i_symbol: usize,
        k_init: usize,
        mask: &BoundedBitset,
        symbols: &'s [Complex32],
    ) -> &'s [Complex32] {
        assert!(
            port < self.nof_ports,
            "Port index (i.e., {}) is out of range (i.e., {}).",
            port,
            self.nof_ports
        );
        assert!(
            i_symbol < self.nof_symbols,
            "Symbol index (i.e., {}) is out of range (i.e., {}).",
            i_symbol,
            self.nof_symbols
        );
        assert!(
            k_init + mask.len() <= self.nof_subc,
            "Mask range (i.e., {}..{}) exceeds the grid subcarriers (i.e., {}).",
            k_init,
            k_init + mask.len(),
            self.nof_subc
        );
        let nof_re = mask.count();
        assert!(
            symbols.len() >= nof_re,
            "The number of symbols (i.e., {}) is smaller than the number of RE (i.e., {}).",
            symbols.len(),
            nof_re
        );
        self.empty[port] = false;
        let mut row = self.data.slice_mut(s![port, i_symbol, ..]);
        for (value, k) in symbols.iter().zip(mask.iter_ones()) {
            row[k_init + k] = *value;
        }
        &symbols[nof_re..]
    }

    /// Write `symbols` to the contiguous subcarriers starting at `k_init`.
    fn put_contiguous(
        &mut self,
        port: usize,
        i_symbol: usize,
        k_init: usize,
        symbols: &[Complex32],
    ) {
        assert!(
            port < self.nof_ports && i_symbol < self.nof_symbols,
            "Grid position (i.e., port {} symbol {}) is out of range (i.e., {}x{}).",
            port,
            i_symbol,
            self.nof_ports,
            self.nof_symbols
        );
        assert!(
            k_init + symbols.len() <= self.nof_subc,
            "Subcarrier range (i.e., {}..{}) exceeds the grid subcarriers (i.e., {}).",
            k_init,
            k_init + symbols.len(),
            self.nof_subc
        );
        self.empty[port] = false;
        self.data
            .slice_mut(s![port, i_symbol, k_init..k_init + symbols.len()])
            .assign(&ArrayView1::from(symbols));
    }

    /// Gather the REs at the set bits of `mask` offset by `k_init` into
    /// `out`, in ascending subcarrier order, returning the unfilled tail.
    fn get_mask<'o>(
        &self,
        port: usize,
        i_symbol: usize,
        k_init: usize,
        mask: &BoundedBitset,
        out: &'o mut [Complex32],
    ) -> &'o mut [Complex32] {
        assert!(
            port < self.nof_ports && i_symbol < self.nof_symbols,
            "Grid position (i.e., port {} symbol {}) is out of range (i.e., {}x{}).",
            port,
            i_symbol,
            self.nof_ports,
            self.nof_symbols
        );
        assert!(
            k_init + mask.len() <= self.nof_subc,
            "Mask range (i.e., {}..{}) exceeds the grid subcarriers (i.e., {}).",
            k_init,
            k_init + mask.len(),
            self.nof_subc
        );
        let nof_re = mask.count();
        assert!(
            out.len() >= nof_re,
            "The output size (i.e., {}) is smaller than the number of RE (i.e., {}).",
            out.len(),
            nof_re
        );
        let (filled, tail) = out.split_at_mut(nof_re);
        let row = self.data.slice(s![port, i_symbol, ..]);
        for (value, k) in filled.iter_mut().zip(mask.iter_ones()) {
            *value = row[k_init + k];
        }
        tail
    }

    fn symbol_view(&self, port: usize, i_symbol: usize) -> ArrayView1<'_, Complex32> {
        assert!(
            port < self.nof_ports && i_symbol < self.nof_symbols,
            "Grid position (i.e., port {} symbol {}) is out of range (i.e., {}x{}).",
            port,
            i_symbol,
            self.nof_ports,
            self.nof_symbols
        );
        self.data.slice(s![port, i_symbol, ..])
    }

    fn set_all_zero(&mut self) {
        for port in 0..self.nof_ports {
            if !self.empty[port] {
                self.data
                    .slice_mut(s![port, .., ..])
                    .fill(Complex32::zero());
                self.empty[port] = true;
            }
        }
    }
}

/// Per-slot resource grid with the injected precoding kernel and the scratch
/// state reused across symbols, PRGs and slots.
pub struct ResourceGrid {
    storage: GridStorage,
    precoder: Box<dyn ChannelPrecoder>,
    layer_mapping_buffer: ReBuffer,
    precoding_buffer: ReBuffer,
}

impl ResourceGrid {
    /// Create a zeroed grid of `nof_ports` × `nof_symbols` × `nof_subc`
    /// resource elements with all ports marked empty.
    pub fn new(
        nof_ports: usize,
        nof_symbols: usize,
        nof_subc: usize,
        precoder: Box<dyn ChannelPrecoder>,
    ) -> Result<Self, PhyError> {
        if nof_ports == 0 {
            return Err(PhyError::InvalidConfiguration(
                "At least one antenna port is required".to_string(),
            ));
        }
        if nof_symbols == 0 || nof_symbols > MAX_NSYMB_PER_SLOT {
            return Err(PhyError::InvalidConfiguration(format!(
                "Number of symbols {} must be in range [1, {}]",
                nof_symbols, MAX_NSYMB_PER_SLOT
            )));
        }
        if nof_subc == 0 || nof_subc > MAX_RB * NRE || nof_subc % NRE != 0 {
            return Err(PhyError::InvalidConfiguration(format!(
                "Number of subcarriers {} must be a multiple of {} in range [{}, {}]",
                nof_subc,
                NRE,
                NRE,
                MAX_RB * NRE
            )));
        }
        debug!(
            "Created resource grid: {} ports, {} symbols, {} subcarriers",
            nof_ports, nof_symbols, nof_subc
        );
        Ok(Self {
            storage: GridStorage {
                data: Array3::zeros((nof_ports, nof_symbols, nof_subc)),
                empty: vec![true; nof_ports],
                nof_ports,
                nof_symbols,
                nof_subc,
            },
            precoder,
            layer_mapping_buffer: ReBuffer::default(),
            precoding_buffer: ReBuffer::default(),
        })
    }

    /// Number of antenna ports.
    pub fn nof_ports(&self) -> usize {
        self.storage.nof_ports
    }

    /// Number of OFDM symbols per slot.
    pub fn nof_symbols(&self) -> usize {
        self.storage.nof_symbols
    }

    /// Number of subcarriers per OFDM symbol.
    pub fn nof_subcarriers(&self) -> usize {
        self.storage.nof_subc
    }

    /// Zero every non-empty port and mark all ports empty, resetting the
    /// grid between slots.
    pub fn set_all_zero(&mut self) {
        self.storage.set_all_zero();
    }

    /// Write access to the grid.
    pub fn get_writer(&mut self) -> ResourceGridWriter<'_> {
        ResourceGridWriter {
            storage: &mut self.storage,
        }
    }

    /// Read access to the grid.
    pub fn get_reader(&self) -> ResourceGridReader<'_> {
        ResourceGridReader {
            storage: &self.storage,
        }
    }

    /// Map a buffered RE source onto the grid.
    ///
    /// `input` holds one contiguous RE sequence per layer. Per OFDM symbol,
    /// the selection mask is resolved from `pattern` minus `reserved`,
    /// symbols with an empty mask are skipped, and the selected REs are
    /// precoded per PRG and written in ascending subcarrier order.
    pub fn map(
        &mut self,
        input: &dyn ReBufferReader,
        pattern: &RePatternList,
        reserved: &RePatternList,
        precoding: &PrecodingConfiguration,
    ) {
        let nof_layers = precoding.nof_layers();
        assert_eq!(
            input.nof_slices(),
            nof_layers,
            "The input number of layers (i.e., {}) and the precoding number of layers (i.e., {}) are different.",
            input.nof_slices(),
            nof_layers
        );
        let nof_precoding_ports = precoding.nof_ports();
        assert!(
            nof_precoding_ports <= self.storage.nof_ports,
            "The precoding number of ports (i.e., {}) exceeds the grid number of ports (i.e., {}).",
            nof_precoding_ports,
            self.storage.nof_ports
        );

        // PRG size in number of subcarriers.
        let prg_size = precoding.prg_size() * NRE;

        // Counter for the number of RE read from the input and mapped to the grid.
        let mut i_re_buffer = 0;
        for i_symbol in 0..self.storage.nof_symbols {
            // Get the symbol RE mask.
            let mut symbol_re_mask = BoundedBitset::new(self.storage.nof_subc);
            pattern.get_inclusion_mask(&mut symbol_re_mask, i_symbol);
            reserved.get_exclusion_mask(&mut symbol_re_mask, i_symbol);

            // Find the highest used subcarrier. Skip symbol if no active subcarrier.
            let i_highest_subc = match symbol_re_mask.find_highest() {
                Some(i_subc) => i_subc,
                None => continue,
            };

            // Resize the mask to the highest subcarrier, ceiling to PRB.
            symbol_re_mask.resize(divide_ceil(i_highest_subc + 1, NRE) * NRE);

            // Number of RE to be allocated for the current symbol.
            let nof_re_symbol = symbol_re_mask.count();

            // Bypass precoding if it has no effect on the signal.
            if nof_layers == 1
                && nof_precoding_ports == 1
                && precoding.nof_prg() == 1
                && precoding.coefficient(0, 0, 0) == Complex32::new(1.0, 0.0)
            {
                // View over the input RE belonging to the current symbol.
                let input_re_symbol = ReBufferView::new(input, i_re_buffer, nof_re_symbol);

                // Map directly to the grid.
                let unmapped =
                    self.storage
                        .put_mask(0, i_symbol, 0, &symbol_re_mask, input_re_symbol.slice(0));
                assert!(unmapped.is_empty(), "Not all REs have been mapped to the grid.");
                i_re_buffer += nof_re_symbol;
                continue;
            }

            if nof_re_symbol != self.precoding_buffer.nof_re()
                || nof_precoding_ports != self.precoding_buffer.nof_slices()
            {
                self.precoding_buffer.resize(nof_precoding_ports, nof_re_symbol);
            }

            // Counter for the number of precoded REs for the current symbol.
            let mut i_precoding_buffer = 0;
            let mut i_subc = 0;
            for i_prg in 0..precoding.nof_prg() {
                if i_subc >= symbol_re_mask.len() {
                    break;
                }

                // Get the precoding matrix for the current PRG.
                let prg_weights = precoding.prg_coefficients(i_prg);

                // Number of grid RE belonging to the current PRG for the
                // provided allocation pattern dimensions.
                let nof_subc_prg = prg_size.min(symbol_re_mask.len() - i_subc);

                // Mask for the RE belonging to the current PRG.
                let prg_re_mask = symbol_re_mask.slice(i_subc, i_subc + nof_subc_prg);

                // Number of allocated RE for the current PRG.
                let nof_re_prg = prg_re_mask.count();

                // View of the input REs belonging to the current PRG.
                let input_re_prg = ReBufferView::new(input, i_re_buffer, nof_re_prg);

                // Apply precoding into the scratch buffer.
                self.precoder.apply_precoding(
                    &mut self.precoding_buffer,
                    i_precoding_buffer,
                    &input_re_prg,
                    prg_weights,
                );

                // Advance input and output buffers.
                i_re_buffer += nof_re_prg;
                i_precoding_buffer += nof_re_prg;

                // Advance mask slice.
                i_subc += nof_subc_prg;
            }

            // Assert that the precoding buffer has been filled.
            assert_eq!(
                i_precoding_buffer,
                self.precoding_buffer.nof_re(),
                "The number of precoded RE (i.e., {}) does not match the precoding buffer size (i.e., {}).",
                i_precoding_buffer,
                self.precoding_buffer.nof_re()
            );

            // Map the precoded REs to each port for the current symbol.
            for i_tx_port in 0..nof_precoding_ports {
                let port_data = self.precoding_buffer.slice(i_tx_port);
                let unmapped =
                    self.storage
                        .put_mask(i_tx_port, i_symbol, 0, &symbol_re_mask, port_data);
                assert!(unmapped.is_empty(), "Not all REs have been mapped to the grid.");
            }
        }

        // Assert that all input REs have been processed.
        assert_eq!(
            i_re_buffer,
            input.nof_re(),
            "The number of total precoded RE (i.e., {}) does not match the number of total input RE (i.e., {}).",
            i_re_buffer,
            input.nof_re()
        );
        debug!("Mapped {} REs onto {} ports", i_re_buffer, nof_precoding_ports);
    }

    /// Map with an empty list of reserved RE patterns.
    pub fn map_unreserved(
        &mut self,
        input: &dyn ReBufferReader,
        pattern: &RePatternList,
        precoding: &PrecodingConfiguration,
    ) {
        self.map(input, pattern, &RePatternList::new(), precoding);
    }

    /// Map a lazily-pulled symbol stream onto the grid.
    ///
    /// Symbols are pulled in blocks bounded by the source's maximum block
    /// size and de-interleaved into layers on the fly: the symbol at stream
    /// position `k` belongs to layer `k % nof_layers`.
    pub fn map_symbols(
        &mut self,
        buffer: &mut dyn SymbolBuffer,
        pattern: &RePatternList,
        reserved: &RePatternList,
        precoding: &PrecodingConfiguration,
    ) {
        let max_block_size = buffer.max_block_size();
        let nof_layers = precoding.nof_layers();
        let nof_antennas = precoding.nof_ports();

        assert!(
            (1..=self.storage.nof_ports).contains(&nof_antennas),
            "The number of antennas (i.e., {}) must be in range [1, {}].",
            nof_antennas,
            self.storage.nof_ports
        );
        assert!(
            (1..=nof_antennas).contains(&nof_layers),
            "The number of layers (i.e., {}) must be in range [1, {}].",
            nof_layers,
            nof_antennas
        );
        assert!(
            max_block_size >= nof_layers,
            "The maximum block size (i.e., {}) must fit at least one RE per layer (i.e., {}).",
            max_block_size,
            nof_layers
        );

        let prg_size = precoding.prg_size() * NRE;
        for i_symbol in 0..self.storage.nof_symbols {
            // Get the symbol RE mask.
            let mut symbol_re_mask = BoundedBitset::new(self.storage.nof_subc);
            pattern.get_inclusion_mask(&mut symbol_re_mask, i_symbol);
            reserved.get_exclusion_mask(&mut symbol_re_mask, i_symbol);

            // Find the highest used subcarrier. Skip symbol if no active subcarrier.
            let i_highest_subc = match symbol_re_mask.find_highest() {
                Some(i_subc) => i_subc,
                None => continue,
            };

            // Iterate all precoding PRGs overlapping the allocation.
            for i_prg in 0..precoding.nof_prg() {
                // Get the subcarrier interval for the PRG.
                let i_subc = i_prg * prg_size;
                if i_subc > i_highest_subc {
                    break;
                }

                // Get the precoding matrix for the current PRG.
                let prg_weights = precoding.prg_coefficients(i_prg);

                // Number of grid RE belonging to the current PRG for the
                // provided allocation pattern dimensions.
                let nof_subc_prg = prg_size.min(i_highest_subc + 1 - i_subc);

                // Mask for the RE belonging to the current PRG.
                let prg_re_mask = symbol_re_mask.slice(i_subc, i_subc + nof_subc_prg);

                // Skip PRG if no RE is selected.
                let mut subc_offset = match prg_re_mask.find_lowest() {
                    Some(lowest) => lowest,
                    None => continue,
                };

                // Process the PRG in blocks bounded by the source pull size.
                while subc_offset != nof_subc_prg {
                    let max_nof_subc_block = max_block_size / nof_layers;

                    let nof_subc_pending = nof_subc_prg - subc_offset;
                    assert!(
                        nof_subc_pending != 0,
                        "The number of pending subcarriers cannot be zero."
                    );

                    // Select the number of subcarriers to process in a block.
                    let nof_subc_block = nof_subc_pending.min(max_nof_subc_block);

                    // Get the allocation mask for the block.
                    let block_mask = prg_re_mask.slice(subc_offset, subc_offset + nof_subc_block);

                    // Count the number of resource elements to map in the block.
                    let nof_re_block = block_mask.count();

                    // Calculate the number of symbols to pull.
                    let nof_symbols_block = nof_re_block * nof_layers;
                    let block = buffer.pop_symbols(nof_symbols_block);
                    assert_eq!(
                        block.len(),
                        nof_symbols_block,
                        "The symbol source produced {} symbols instead of {}.",
                        block.len(),
                        nof_symbols_block
                    );

                    if nof_layers == 1 && nof_antennas == 1 {
                        // Skip layer mapping and apply only one coefficient.
                        self.precoding_buffer.resize(1, nof_re_block);
                        let coefficient = prg_weights.coefficient(0, 0);
                        for (out, symbol) in
                            self.precoding_buffer.slice_mut(0).iter_mut().zip(block)
                        {
                            *out = symbol * coefficient;
                        }

                        let unmapped = self.storage.put_mask(
                            0,
                            i_symbol,
                            i_subc + subc_offset,
                            &block_mask,
                            self.precoding_buffer.slice(0),
                        );
                        assert!(
                            unmapped.is_empty(),
                            "Not all REs have been mapped to the grid."
                        );
                    } else {
                        self.layer_mapping_buffer.resize(nof_layers, nof_re_block);
                        self.precoding_buffer.resize(nof_antennas, nof_re_block);

                        // Layer map: symbol k belongs to layer k % nof_layers.
                        for i_layer in 0..nof_layers {
                            let layer_data = self.layer_mapping_buffer.slice_mut(i_layer);
                            for (i_re, value) in layer_data.iter_mut().enumerate() {
                                *value = block[i_re * nof_layers + i_layer];
                            }
                        }

                        // Apply precoding and map for each port.
                        for i_port in 0..nof_antennas {
                            self.precoder.apply_precoding_port(
                                self.precoding_buffer.slice_mut(0),
                                &self.layer_mapping_buffer,
                                prg_weights.port_coefficients(i_port),
                            );

                            let unmapped = self.storage.put_mask(
                                i_port,
                                i_symbol,
                                i_subc + subc_offset,
                                &block_mask,
                                self.precoding_buffer.slice(0),
                            );
                            assert!(
                                unmapped.is_empty(),
                                "Not all REs have been mapped to the grid."
                            );
                        }
                    }

                    // Increment the subcarrier offset.
                    subc_offset += nof_subc_block;
                }
            }
        }
    }
}

/// Write access to the resource grid.
///
/// Writing assumes a single writer per grid and slot; there is no internal
/// locking.
pub struct ResourceGridWriter<'a> {
    storage: &'a mut GridStorage,
}

impl ResourceGridWriter<'_> {
    /// Write `symbols` to the set bits of `mask` offset by `k_init` on the
    /// given port and OFDM symbol, in ascending subcarrier order.
    ///
    /// Returns the unconsumed tail of `symbols`; a non-empty return is a
    /// contract violation on the caller's side.
    pub fn put<'s>(
        &mut self,
        port: usize,
        i_symbol: usize,
        k_init: usize,
        mask: &BoundedBitset,
        symbols: &'s [Complex32],
    ) -> &'s [Complex32] {
        self.storage.put_mask(port, i_symbol, k_init, mask, symbols)
    }

    /// Write `symbols` to the contiguous subcarriers starting at `k_init`.
    pub fn put_contiguous(
        &mut self,
        port: usize,
        i_symbol: usize,
        k_init: usize,
        symbols: &[Complex32],
    ) {
        self.storage.put_contiguous(port, i_symbol, k_init, symbols);
    }
}

/// Read access to the resource grid.
pub struct ResourceGridReader<'a> {
    storage: &'a GridStorage,
}

impl ResourceGridReader<'_> {
    /// True if the port has not been written since the last reset.
    pub fn is_empty(&self, port: usize) -> bool {
        self.storage.empty[port]
    }

    /// Gather the REs at the set bits of `mask` offset by `k_init` into
    /// `out`, returning the unfilled tail.
    pub fn get<'o>(
        &self,
        port: usize,
        i_symbol: usize,
        k_init: usize,
        mask: &BoundedBitset,
        out: &'o mut [Complex32],
    ) -> &'o mut [Complex32] {
        self.storage.get_mask(port, i_symbol, k_init, mask, out)
    }

    /// Contiguous view of one OFDM symbol's subcarriers on one port.
    pub fn symbol_view(&self, port: usize, i_symbol: usize) -> ArrayView1<'_, Complex32> {
        self.storage.symbol_view(port, i_symbol)
    }
}
