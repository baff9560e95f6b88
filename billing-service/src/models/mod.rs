pub mod account;
pub mod batch;
pub mod bill;
pub mod customer;
pub mod invoice;
pub mod journal;
pub mod meter;
pub mod payment;

pub use account::{Account, AccountType, CreateAccount};
pub use batch::{BatchError, BatchOutcome, BatchSummary, BillTemplate, CreatedBill};
pub use bill::{Bill, BillStatus, BillType, CreateBill, ListBillsFilter};
pub use customer::{CreateCustomer, Customer};
pub use invoice::{Invoice, InvoiceBill, InvoiceState, InvoiceStatus, ListInvoicesFilter};
pub use journal::{Direction, Journal, PostingLine, TransactionType};
pub use meter::{CreateAssignment, CreateMeter, Meter, MeterAssignment};
pub use payment::{Payment, PaymentMethod, PaymentStatus, RecordPayment};
