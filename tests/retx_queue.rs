//! ReTx queue invariants exercised through its public API only.

use rlc_am::retx_queue::{RetxDescriptor, RetxQueue};

#[test]
fn retx_bytes_tracks_sum_of_live_entry_lengths() {
    let mut q = RetxQueue::new(8);
    q.try_push(RetxDescriptor { sn: 1, so: 0, length: 10 });
    q.try_push(RetxDescriptor { sn: 2, so: 0, length: 20 });
    q.try_push(RetxDescriptor { sn: 3, so: 0, length: 30 });
    assert_eq!(q.state().retx_bytes, 60);

    q.remove_sn(2);
    assert_eq!(q.state().retx_bytes, 40);

    q.pop();
    assert_eq!(q.state().retx_bytes, 30);
}

#[test]
fn full_queue_rejects_further_pushes_until_drained() {
    let mut q = RetxQueue::new(2);
    assert!(q.try_push(RetxDescriptor { sn: 1, so: 0, length: 1 }));
    assert!(q.try_push(RetxDescriptor { sn: 2, so: 0, length: 1 }));
    assert!(!q.try_push(RetxDescriptor { sn: 3, so: 0, length: 1 }));
    q.pop();
    assert!(q.try_push(RetxDescriptor { sn: 3, so: 0, length: 1 }));
}

#[test]
fn invalidated_middle_entry_never_resurfaces() {
    let mut q = RetxQueue::new(4);
    q.try_push(RetxDescriptor { sn: 1, so: 0, length: 5 });
    q.try_push(RetxDescriptor { sn: 2, so: 0, length: 5 });
    q.try_push(RetxDescriptor { sn: 3, so: 0, length: 5 });

    q.remove_sn(2);
    let mut seen = Vec::new();
    while let Some(d) = q.pop() {
        seen.push(d.sn);
    }
    assert_eq!(seen, vec![1, 3]);
}
