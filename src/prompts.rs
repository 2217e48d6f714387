//! Prompts for the two invoice agents.
//!
//! Every instruction sent to a model lives here so wording changes never
//! touch the retry or orchestration logic in [`crate::pipeline::agents`].

use crate::invoice::NO_INVOICE;

/// System prompt for the page extraction agent (image → text).
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"Your primary task is to extract invoice details from image. The extracted details should include the following information. If any detail is not present, use the reserved keyword "NOT_AVAILABLE":

1. Invoice Number
2. Invoice Date
3. Seller Details (Company Name, GST No, Pan No, Address, Phone Number, Email) [if present]
4. Buyer Details (Company Name, GST No, Pan No, Address, Phone Number, Email) [if present]
5. Item Details (Description, Quantity, Price, Currency) [If multiple items are present, capture all of them]
6. Total Tax (CGST, IGST, SGST) [if present]
7. Total Charges [if present]
8. Total Discount [if present]
9. Total Amount
10. Amount Paid [if present]
11. Amount Due [if present]

If the document is not an invoice, return only the reserved keyword "NO_INVOICE".

Example response format:
```
1. Invoice Number: 1118212440009383
2. Invoice Date: 21-MAR-2022
3. Seller Details:
   - Company Name: VRRDDHI FREIGHT PVT LTD
   - GST No: NOT_AVAILABLE
   - PAN No: NOT_AVAILABLE
   - Address: 28 A 116, Egato Trade Centre, Poonamallee High Road, Kilpauk, Chennai - 600 010
   - Phone Number: +91 44 25003622
   - Email: seller@abc.co.in
4. Buyer Details:
   - Company Name: SUNDARAM CLAYTON LIMITED
   - GST No: NOT_AVAILABLE
   - PAN No: NOT_AVAILABLE
   - Address: PADI CHENNAI - 600050
   - Phone Number: NOT_AVAILABLE
   - Email: NOT_AVAILABLE
5. Item Details:
   - 1. Description: FREIGHT CHARGE, Quantity: 1.000, Price: 8700.00, Currency: INR
   - 2. Description: DESTINATION CHARGES, Quantity: 1.000, Price: 1600.00, Currency: INR
6. Total Tax:
   - CGST: 0.00
   - SGST: 0.00
   - IGST: 0.00
7. Total Charges: NOT_AVAILABLE
8. Total Discount: NOT_AVAILABLE
9. Total Amount: 10300.00
10. Amount Paid: NOT_AVAILABLE
11. Amount Due: NOT_AVAILABLE
```"#;

/// User turn accompanying the page image.
pub const EXTRACTION_USER_PROMPT: &str = "Please extract the invoice details from the image.";

/// System prompt for the structuring agent (text → JSON).
pub const STRUCTURING_SYSTEM_PROMPT: &str = r#"You will be given text from a PDF file containing invoice information. You need to format the data according to the provided JSON schema.
Some pages might not contain invoice information; for those pages reply with the single word null.

Reply with ONE JSON object and nothing else, using exactly these keys:
{
  "invoice_number": string,
  "invoice_date": string,
  "seller_details": {"name": string, "gst_no": string, "pan_no": string, "address": string, "phone_number": string, "email": string},
  "buyer_details": {"name": string, "gst_no": string, "pan_no": string, "address": string, "phone_number": string, "email": string},
  "items": [{"slno": positive integer, "description": string, "quantity": string, "price": string, "currency": string}],
  "total_tax": {"CGST": number, "SGST": number, "IGST": number},
  "total_charge": number,
  "total_discount": number,
  "total_amount": number,
  "amount_paid": number,
  "amount_due": number,
  "page_no": integer
}
Use "NOT_AVAILABLE" for missing text fields and 0 for missing numbers. Currency defaults to "INR"."#;

/// Sent back to the structuring agent when its reply failed validation.
pub const FORMAT_RETRY_PROMPT: &str =
    "Final result format is not correct. Reply again with only the JSON object described above.";

/// Wrap a page transcription with its page-number header.
pub fn page_message(page_no: usize, page_content: &str) -> String {
    format!("Page No {page_no}\n{page_content}\n")
}

/// True when the extraction agent reported the page is not an invoice.
pub fn is_no_invoice(transcription: &str) -> bool {
    let t = transcription.trim().trim_matches(|c: char| c == '`' || c == '"' || c == '.');
    t.eq_ignore_ascii_case(NO_INVOICE)
}
