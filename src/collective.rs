//! The collective runtime capability: rank identity, broadcasts, status
//! agreement and tagged point-to-point transfers.
//!
//! Two implementations ship: `SingleProcess`, where every collective
//! collapses, and `ChannelWorld`, a crossbeam-channel mesh that hosts a
//! whole rank set inside one process. An MPI-backed implementation is a
//! matter of writing this trait against a bindings crate; the engine only
//! ever sees the trait.

use std::process;

use crossbeam_channel::{unbounded, Receiver, Sender};

use error::{Error, Result};
use profile::ProfileSpec;

/// The rank that owns the staging database and performs all file I/O.
pub const OWNER_RANK: usize = 0;

pub trait Collective: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Root's buffer lands on every rank; non-root inputs are ignored.
    fn broadcast_bytes(&self, buf: Vec<u8>, root: usize) -> Result<Vec<u8>>;

    fn broadcast_i64(&self, value: i64, root: usize) -> Result<i64>;

    /// Logical AND over every rank's flag. This is how a failure seen by
    /// one rank becomes a failure seen by all of them.
    fn agree(&self, ok: bool) -> Result<bool>;

    fn send_i64s(&self, dest: usize, tag: u32, buf: &[i64]) -> Result<()>;

    fn recv_i64s(&self, src: usize, tag: u32, len: usize) -> Result<Vec<i64>>;

    fn send_f64s(&self, dest: usize, tag: u32, buf: &[f64]) -> Result<()>;

    fn recv_f64s(&self, src: usize, tag: u32, len: usize) -> Result<Vec<f64>>;

    /// Last resort for hosts that want the whole job torn down rather than
    /// an error return. Never called by the engine itself.
    fn abort(&self, code: i32) -> !;
}

/// No peers; rank 0 of 1.
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, buf: Vec<u8>, _root: usize) -> Result<Vec<u8>> {
        Ok(buf)
    }

    fn broadcast_i64(&self, value: i64, _root: usize) -> Result<i64> {
        Ok(value)
    }

    fn agree(&self, ok: bool) -> Result<bool> {
        Ok(ok)
    }

    fn send_i64s(&self, dest: usize, _tag: u32, _buf: &[i64]) -> Result<()> {
        Err(no_peer(dest))
    }

    fn recv_i64s(&self, src: usize, _tag: u32, _len: usize) -> Result<Vec<i64>> {
        Err(no_peer(src))
    }

    fn send_f64s(&self, dest: usize, _tag: u32, _buf: &[f64]) -> Result<()> {
        Err(no_peer(dest))
    }

    fn recv_f64s(&self, src: usize, _tag: u32, _len: usize) -> Result<Vec<f64>> {
        Err(no_peer(src))
    }

    fn abort(&self, code: i32) -> ! {
        error!("aborting the process (code {})", code);
        process::exit(code)
    }
}

fn no_peer(rank: usize) -> Error {
    Error::Collective {
        detail: format!("rank {} does not exist in a single-process world", rank),
    }
}

#[derive(Debug)]
enum Payload {
    Bytes(Vec<u8>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

#[derive(Debug)]
struct Packet {
    tag: u32,
    payload: Payload,
}

// internal tags, out of the way of the data-plane tags 0 and 1
const TAG_BCAST: u32 = 0x8000_0000;
const TAG_AGREE: u32 = 0x8000_0001;

/// One rank's handle on an in-process world. Channels are FIFO per
/// (source, destination) pair, which is all the ordering the engine needs.
pub struct ChannelWorld {
    rank: usize,
    to: Vec<Sender<Packet>>,
    from: Vec<Receiver<Packet>>,
}

impl ChannelWorld {
    /// Builds an `n`-rank world; hand one handle to each rank thread.
    pub fn create(n: usize) -> Vec<ChannelWorld> {
        let mut senders: Vec<Vec<Sender<Packet>>> = (0..n).map(|_| Vec::with_capacity(n)).collect();
        let mut inboxes: Vec<Vec<Receiver<Packet>>> =
            (0..n).map(|_| Vec::with_capacity(n)).collect();
        // one channel per (src, dst) pair; inboxes[dst][src] pairs with
        // senders[src][dst]
        for src in 0..n {
            for dst in 0..n {
                let (tx, rx) = unbounded();
                senders[src].push(tx);
                inboxes[dst].push(rx);
            }
        }
        senders
            .into_iter()
            .zip(inboxes.into_iter())
            .enumerate()
            .map(|(rank, (to, from))| ChannelWorld { rank, to, from })
            .collect()
    }

    fn post(&self, dest: usize, packet: Packet) -> Result<()> {
        let sender = self.to.get(dest).ok_or_else(|| Error::Collective {
            detail: format!("rank {} is outside this {}-rank world", dest, self.to.len()),
        })?;
        sender.send(packet).map_err(|_| Error::Collective {
            detail: format!("rank {} has left the world", dest),
        })
    }

    fn take(&self, src: usize, tag: u32) -> Result<Payload> {
        let receiver = self.from.get(src).ok_or_else(|| Error::Collective {
            detail: format!("rank {} is outside this {}-rank world", src, self.from.len()),
        })?;
        let packet = receiver.recv().map_err(|_| Error::Collective {
            detail: format!("rank {} has left the world", src),
        })?;
        if packet.tag != tag {
            return Err(Error::Collective {
                detail: format!(
                    "rank {} sent tag {} where tag {} was expected; the ranks have \
                     diverged in their collective call order",
                    src, packet.tag, tag
                ),
            });
        }
        Ok(packet.payload)
    }
}

impl Collective for ChannelWorld {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.to.len()
    }

    fn broadcast_bytes(&self, buf: Vec<u8>, root: usize) -> Result<Vec<u8>> {
        if self.rank == root {
            for dest in 0..self.size() {
                if dest != root {
                    self.post(
                        dest,
                        Packet {
                            tag: TAG_BCAST,
                            payload: Payload::Bytes(buf.clone()),
                        },
                    )?;
                }
            }
            Ok(buf)
        } else {
            match self.take(root, TAG_BCAST)? {
                Payload::Bytes(bytes) => Ok(bytes),
                other => Err(type_mismatch(root, &other)),
            }
        }
    }

    fn broadcast_i64(&self, value: i64, root: usize) -> Result<i64> {
        if self.rank == root {
            for dest in 0..self.size() {
                if dest != root {
                    self.post(
                        dest,
                        Packet {
                            tag: TAG_BCAST,
                            payload: Payload::Ints(vec![value]),
                        },
                    )?;
                }
            }
            Ok(value)
        } else {
            match self.take(root, TAG_BCAST)? {
                Payload::Ints(ref ints) if ints.len() == 1 => Ok(ints[0]),
                other => Err(type_mismatch(root, &other)),
            }
        }
    }

    fn agree(&self, ok: bool) -> Result<bool> {
        if self.rank == OWNER_RANK {
            let mut all = ok;
            for src in 0..self.size() {
                if src != OWNER_RANK {
                    match self.take(src, TAG_AGREE)? {
                        Payload::Ints(ref ints) if ints.len() == 1 => all &= ints[0] != 0,
                        other => return Err(type_mismatch(src, &other)),
                    }
                }
            }
            self.broadcast_i64(all as i64, OWNER_RANK).map(|v| v != 0)
        } else {
            self.post(
                OWNER_RANK,
                Packet {
                    tag: TAG_AGREE,
                    payload: Payload::Ints(vec![ok as i64]),
                },
            )?;
            self.broadcast_i64(0, OWNER_RANK).map(|v| v != 0)
        }
    }

    fn send_i64s(&self, dest: usize, tag: u32, buf: &[i64]) -> Result<()> {
        self.post(
            dest,
            Packet {
                tag,
                payload: Payload::Ints(buf.to_vec()),
            },
        )
    }

    fn recv_i64s(&self, src: usize, tag: u32, len: usize) -> Result<Vec<i64>> {
        match self.take(src, tag)? {
            Payload::Ints(ints) => {
                if ints.len() == len {
                    Ok(ints)
                } else {
                    Err(length_mismatch(src, ints.len(), len))
                }
            }
            other => Err(type_mismatch(src, &other)),
        }
    }

    fn send_f64s(&self, dest: usize, tag: u32, buf: &[f64]) -> Result<()> {
        self.post(
            dest,
            Packet {
                tag,
                payload: Payload::Floats(buf.to_vec()),
            },
        )
    }

    fn recv_f64s(&self, src: usize, tag: u32, len: usize) -> Result<Vec<f64>> {
        match self.take(src, tag)? {
            Payload::Floats(floats) => {
                if floats.len() == len {
                    Ok(floats)
                } else {
                    Err(length_mismatch(src, floats.len(), len))
                }
            }
            other => Err(type_mismatch(src, &other)),
        }
    }

    fn abort(&self, code: i32) -> ! {
        error!("rank {} aborting the world (code {})", self.rank, code);
        // dropping this handle disconnects the mesh; peers blocked in recv
        // fail over to an error instead of hanging
        panic!("collective abort (code {})", code)
    }
}

fn type_mismatch(src: usize, got: &Payload) -> Error {
    let kind = match *got {
        Payload::Bytes(_) => "bytes",
        Payload::Ints(_) => "integers",
        Payload::Floats(_) => "floats",
    };
    Error::Collective {
        detail: format!("rank {} sent {} where another type was expected", src, kind),
    }
}

fn length_mismatch(src: usize, got: usize, wanted: usize) -> Error {
    Error::Collective {
        detail: format!(
            "rank {} sent a buffer of {} entries where {} were expected",
            src, got, wanted
        ),
    }
}

/// Verifies that every rank constructed the same profile: same name, same
/// events in the same order, same categories in the same order. The owner
/// rank's spelling is the reference; any divergence is reported on every
/// rank so nobody proceeds to write a store the others did not agree to.
pub fn negotiate_profile(collective: &dyn Collective, spec: &ProfileSpec) -> Result<()> {
    let reference = collective.broadcast_bytes(spec.name().as_bytes().to_vec(), OWNER_RANK)?;
    let name_ok = reference == spec.name().as_bytes();
    if !collective.agree(name_ok)? {
        diag!("profile name does not match on rank {}", collective.rank());
        return Err(Error::CollectiveDisagreement {
            detail: "profile name".to_string(),
        });
    }

    check_name_list(collective, spec.events(), "event")?;
    check_name_list(collective, spec.categories(), "category")?;
    Ok(())
}

fn check_name_list(
    collective: &dyn Collective,
    names: &[String],
    what: &'static str,
) -> Result<()> {
    let count = collective.broadcast_i64(names.len() as i64, OWNER_RANK)?;
    if !collective.agree(count == names.len() as i64)? {
        diag!(
            "number of {} entries does not match on rank {}",
            what,
            collective.rank()
        );
        return Err(Error::CollectiveDisagreement {
            detail: format!("{} count", what),
        });
    }

    let mut all_match = true;
    for name in names {
        let reference = collective.broadcast_bytes(name.as_bytes().to_vec(), OWNER_RANK)?;
        all_match &= reference == name.as_bytes();
    }
    if !collective.agree(all_match)? {
        diag!("{} names do not match on rank {}", what, collective.rank());
        return Err(Error::CollectiveDisagreement {
            detail: format!("{} names", what),
        });
    }
    Ok(())
}
